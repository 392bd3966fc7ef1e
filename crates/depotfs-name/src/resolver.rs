//! Process-wide name registry
//!
//! The registry keeps every registered name's bytes in a vector sorted by
//! 64-bit hash. Registration is insert-if-absent: one binary search yields
//! both the duplicate check and the insertion point. A second map keyed by
//! the 32-bit FNV-1a hash of the bytes serves lookups from places that only
//! carry the short hash.
//!
//! Mutation is serialized by a single `RwLock`, so names may be registered
//! from any thread, including filesystem request threads after the volume
//! has started.

use crate::fnv::{fnv1a32, fnv1a64};
use crate::name::Name;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct Entry {
    name: Name,
    bytes: Arc<[u8]>,
}

/// Deduplicated registry of known names
#[derive(Debug, Default)]
pub struct NameResolver {
    entries: RwLock<Vec<Entry>>,
    short_map: DashMap<u32, Name>,
}

impl NameResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash `raw` and register it if no name with that hash is known yet
    ///
    /// Returns the name either way. Re-registering a known name is a no-op.
    pub fn register_name(&self, raw: &[u8]) -> Name {
        let name = Name::hashed(raw);
        let mut entries = self.entries.write();
        self.insert_locked(&mut entries, name, raw);
        name
    }

    /// Register a batch of names
    ///
    /// Capacity for the whole batch is reserved up front and the lock is
    /// taken once. Input order has no effect on the final set.
    pub fn feed<I, S>(&self, batch: I) -> Vec<Name>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let batch = batch.into_iter();
        let (lower, _) = batch.size_hint();

        let mut entries = self.entries.write();
        entries.reserve(lower);

        let names: Vec<Name> = batch
            .map(|raw| {
                let raw = raw.as_ref();
                let name = Name::hashed(raw);
                self.insert_locked(&mut entries, name, raw);
                name
            })
            .collect();

        debug!(
            "Fed {} names, registry now holds {}",
            names.len(),
            entries.len()
        );
        names
    }

    /// Insert `raw` under `name` unless the hash is already present
    ///
    /// Returns `true` when a new entry was added.
    fn insert_locked(&self, entries: &mut Vec<Entry>, name: Name, raw: &[u8]) -> bool {
        match entries.binary_search_by_key(&name, |entry| entry.name) {
            Ok(pos) => {
                if *entries[pos].bytes != *raw {
                    warn!(
                        "Name hash collision on {}: keeping {:?}, ignoring {:?}",
                        name,
                        String::from_utf8_lossy(&entries[pos].bytes),
                        String::from_utf8_lossy(raw)
                    );
                }
                false
            }
            Err(pos) => {
                entries.insert(
                    pos,
                    Entry {
                        name,
                        bytes: Arc::from(raw),
                    },
                );
                self.short_map.entry(fnv1a32(raw)).or_insert(name);
                true
            }
        }
    }

    /// Register `raw` under an explicit name, bypassing hashing
    #[cfg(test)]
    fn insert_with_name(&self, name: Name, raw: &[u8]) -> bool {
        let mut entries = self.entries.write();
        self.insert_locked(&mut entries, name, raw)
    }

    /// Whether a name with this hash has been registered
    pub fn contains(&self, name: Name) -> bool {
        self.entries
            .read()
            .binary_search_by_key(&name, |entry| entry.name)
            .is_ok()
    }

    /// Original bytes of a registered name
    pub fn resolve(&self, name: Name) -> Option<Arc<[u8]>> {
        let entries = self.entries.read();
        entries
            .binary_search_by_key(&name, |entry| entry.name)
            .ok()
            .map(|pos| Arc::clone(&entries[pos].bytes))
    }

    /// Original text of a registered name, lossily decoded as UTF-8
    pub fn resolve_str(&self, name: Name) -> Option<String> {
        self.resolve(name)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Find a registered name from the 32-bit FNV-1a hash of its bytes
    pub fn resolve_short(&self, short_hash: u32) -> Option<Name> {
        self.short_map.get(&short_hash).map(|name| *name)
    }

    /// Number of registered names
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no names are registered
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of all registered names in hash order
    pub fn names(&self) -> Vec<Name> {
        self.entries.read().iter().map(|entry| entry.name).collect()
    }

    /// Registry statistics
    pub fn stats(&self) -> ResolverStats {
        let entries = self.entries.read();
        ResolverStats {
            names: entries.len(),
            bytes: entries.iter().map(|entry| entry.bytes.len()).sum(),
            short_hashes: self.short_map.len(),
        }
    }
}

/// Resolver statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverStats {
    /// Number of registered names
    pub names: usize,
    /// Total bytes of retained name text
    pub bytes: usize,
    /// Number of distinct 32-bit hashes in the reverse map
    pub short_hashes: usize,
}

static GLOBAL: RwLock<Option<Arc<NameResolver>>> = parking_lot::const_rwlock(None);

/// Create the process-wide resolver if it does not exist yet
///
/// Returns the current instance either way.
pub fn init_global() -> Arc<NameResolver> {
    if let Some(resolver) = GLOBAL.read().as_ref() {
        return Arc::clone(resolver);
    }

    let mut slot = GLOBAL.write();
    Arc::clone(slot.get_or_insert_with(|| {
        debug!("Initializing global name resolver");
        Arc::new(NameResolver::new())
    }))
}

/// Replace the process-wide resolver, returning the previous one
pub fn install_global(resolver: Arc<NameResolver>) -> Option<Arc<NameResolver>> {
    GLOBAL.write().replace(resolver)
}

/// The process-wide resolver, created on first use
pub fn global() -> Arc<NameResolver> {
    init_global()
}

/// Detach the process-wide resolver
///
/// Holders of the returned `Arc` (and earlier clones) keep a working
/// registry. The next call to [`global`] starts a fresh one.
pub fn shutdown_global() -> Option<Arc<NameResolver>> {
    let previous = GLOBAL.write().take();
    if let Some(resolver) = &previous {
        debug!(
            "Shutting down global name resolver with {} names",
            resolver.len()
        );
    }
    previous
}

/// Hash helper matching [`Name::hashed`], for callers holding only bytes
pub const fn hash_of(raw: &[u8]) -> u64 {
    fnv1a64(raw)
}
