//! Interned name value

use crate::fnv::fnv1a64;
use crate::resolver::{self, NameResolver};
use std::fmt;

/// A hash-identified name
///
/// A `Name` is just the 64-bit FNV-1a hash of the raw bytes it was built
/// from. Two names with the same hash are the same name: equality,
/// ordering and hashing all go through the hash alone. The original bytes
/// live in the [`NameResolver`] side table, and only when the name was
/// registered there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Name(u64);

impl Name {
    /// Hash `raw` into a name, optionally registering it in the process-wide
    /// resolver
    ///
    /// Any byte sequence is a legal name, including the empty one.
    pub fn new(raw: impl AsRef<[u8]>, register: bool) -> Self {
        let raw = raw.as_ref();
        if register {
            resolver::global().register_name(raw)
        } else {
            Self(fnv1a64(raw))
        }
    }

    /// Hash `raw` into a name and register it in `resolver`
    pub fn new_in(raw: impl AsRef<[u8]>, resolver: &NameResolver) -> Self {
        resolver.register_name(raw.as_ref())
    }

    /// Hash `raw` without touching any resolver
    pub const fn hashed(raw: &[u8]) -> Self {
        Self(fnv1a64(raw))
    }

    /// Wrap an already computed hash
    pub const fn from_hash(hash: u64) -> Self {
        Self(hash)
    }

    /// The 64-bit hash identifying this name
    pub const fn hash(self) -> u64 {
        self.0
    }

    /// Look up the original text in the process-wide resolver
    pub fn resolve(self) -> Option<String> {
        resolver::global().resolve_str(self)
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Self::hashed(value.as_bytes())
    }
}

impl From<&[u8]> for Name {
    fn from(value: &[u8]) -> Self {
        Self::hashed(value)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_equality_is_hash_equality() {
        let a = Name::hashed(b"base/gameplay");
        let b = Name::from("base/gameplay");
        assert_eq!(a, b);
        assert_eq!(a, Name::from_hash(a.hash()));
        assert_ne!(a, Name::from("base/Gameplay"));
    }

    #[test]
    fn test_empty_name_is_legal() {
        let empty = Name::hashed(b"");
        assert_eq!(empty.hash(), crate::fnv::FNV64_OFFSET_BASIS);
    }

    #[test]
    fn test_name_display() {
        let name = Name::from_hash(0x0123_4567_89ab_cdef);
        assert_eq!(name.to_string(), "0123456789abcdef");
    }

    #[test]
    fn test_new_in_registers() {
        let resolver = NameResolver::new();
        let name = Name::new_in("engine", &resolver);
        assert_eq!(name, Name::from("engine"));
        assert!(resolver.contains(name));
        assert_eq!(resolver.resolve_str(name).as_deref(), Some("engine"));
    }

    #[test]
    fn test_unregistered_name_still_usable() {
        let resolver = NameResolver::new();
        let name = Name::new("never_registered_component", false);
        assert!(!resolver.contains(name));
        assert_eq!(name.hash(), fnv1a64(b"never_registered_component"));
    }
}
