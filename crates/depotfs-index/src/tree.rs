//! In-memory tree implementation of [`ContentIndex`]
//!
//! Every path component is lower-cased and interned through a
//! [`NameResolver`]; directories map those [`Name`]s to child nodes. The
//! original spelling is kept per node for display. Children are also kept in
//! a vector sorted by lower-cased name, so enumeration is ordered and stable.

use crate::index::{
    ArchiveEntry, ArchiveReader, ContentIndex, EntryInfo, EntryKind, LoadedArchive, NodeId,
};
use crate::payload::Payload;
use crate::{IndexError, Result};
use depotfs_name::{Name, NameResolver};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

enum NodeKind {
    Directory {
        children: HashMap<Name, NodeId>,
        ordered: Vec<NodeId>,
    },
    File {
        payload: Arc<dyn Payload>,
    },
}

struct Node {
    name: String,
    sort_key: String,
    parent: Option<NodeId>,
    kind: NodeKind,
}

impl Node {
    fn directory(name: String, sort_key: String, parent: Option<NodeId>) -> Self {
        Self {
            name,
            sort_key,
            parent,
            kind: NodeKind::Directory {
                children: HashMap::new(),
                ordered: Vec::new(),
            },
        }
    }

    fn size(&self) -> u64 {
        match &self.kind {
            NodeKind::Directory { .. } => 0,
            NodeKind::File { payload } => payload.size(),
        }
    }
}

/// Result of inserting one file into the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new file node was created
    Added(NodeId),
    /// An existing file's payload was replaced
    Replaced(NodeId),
    /// The path conflicts with an existing node of the other kind
    Skipped,
}

/// Tree-shaped content index fed by an [`ArchiveReader`]
pub struct TreeIndex<R> {
    reader: R,
    resolver: Arc<NameResolver>,
    nodes: Vec<Node>,
    total_size: u64,
    file_count: usize,
    archives: Vec<PathBuf>,
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '\\'])
        .filter(|component| !component.is_empty() && *component != ".")
}

impl<R: ArchiveReader> TreeIndex<R> {
    /// Create an empty index that interns names into the process-wide
    /// resolver
    pub fn new(reader: R) -> Self {
        Self::with_resolver(reader, depotfs_name::global())
    }

    /// Create an empty index that interns names into `resolver`
    pub fn with_resolver(reader: R, resolver: Arc<NameResolver>) -> Self {
        Self {
            reader,
            resolver,
            nodes: vec![Node::directory(String::new(), String::new(), None)],
            total_size: 0,
            file_count: 0,
            archives: Vec::new(),
        }
    }

    /// Resolver used for interning
    pub fn resolver(&self) -> &Arc<NameResolver> {
        &self.resolver
    }

    /// Archives loaded so far, in load order
    pub fn archives(&self) -> &[PathBuf] {
        &self.archives
    }

    /// Number of file nodes
    pub const fn file_count(&self) -> usize {
        self.file_count
    }

    /// Number of directory nodes, including the root
    pub fn directory_count(&self) -> usize {
        self.nodes.len() - self.file_count
    }

    /// Full path of a node, `\` separated, without a leading separator
    pub fn path_of(&self, id: NodeId) -> Option<String> {
        let mut parts = Vec::new();
        let mut current = self.nodes.get(id.index())?;
        while let Some(parent) = current.parent {
            parts.push(current.name.as_str());
            current = &self.nodes[parent.index()];
        }
        parts.reverse();
        Some(parts.join("\\"))
    }

    /// Insert a file, creating intermediate directories
    ///
    /// A file already present at the same path is replaced, so later
    /// archives override earlier ones.
    pub fn insert(&mut self, path: &str, payload: Arc<dyn Payload>) -> InsertOutcome {
        let parts: Vec<&str> = components(path).collect();
        let Some((file_name, dirs)) = parts.split_last() else {
            warn!("Ignoring entry with empty path {:?}", path);
            return InsertOutcome::Skipped;
        };

        let mut parent = NodeId::ROOT;
        for dir in dirs {
            match self.child_or_insert(parent, dir, None) {
                Some(id) => parent = id,
                None => {
                    warn!("Skipping {}: {} is a file", path, dir);
                    return InsertOutcome::Skipped;
                }
            }
        }

        let (key, _) = self.intern(file_name);
        if let Some(existing) = self.child(parent, key) {
            let node = &mut self.nodes[existing.index()];
            return match &mut node.kind {
                NodeKind::File { payload: current } => {
                    self.total_size = self.total_size - current.size() + payload.size();
                    *current = payload;
                    InsertOutcome::Replaced(existing)
                }
                NodeKind::Directory { .. } => {
                    warn!("Skipping {}: a directory has the same path", path);
                    InsertOutcome::Skipped
                }
            };
        }

        let size = payload.size();
        match self.child_or_insert(parent, file_name, Some(payload)) {
            Some(id) => {
                self.total_size += size;
                self.file_count += 1;
                InsertOutcome::Added(id)
            }
            None => InsertOutcome::Skipped,
        }
    }

    /// Lower-case and intern one component
    fn intern(&self, component: &str) -> (Name, String) {
        let sort_key = component.to_lowercase();
        (Name::new_in(&sort_key, &self.resolver), sort_key)
    }

    fn child(&self, parent: NodeId, key: Name) -> Option<NodeId> {
        match &self.nodes.get(parent.index())?.kind {
            NodeKind::Directory { children, .. } => children.get(&key).copied(),
            NodeKind::File { .. } => None,
        }
    }

    /// Find the child named `component` under `parent`, creating it if absent
    ///
    /// New nodes are files when `payload` is given and directories otherwise.
    /// Returns `None` when an existing child is a file but a directory was
    /// requested.
    fn child_or_insert(
        &mut self,
        parent: NodeId,
        component: &str,
        payload: Option<Arc<dyn Payload>>,
    ) -> Option<NodeId> {
        let (key, sort_key) = self.intern(component);
        if let Some(existing) = self.child(parent, key) {
            return match (&self.nodes[existing.index()].kind, payload) {
                (NodeKind::Directory { .. }, None) => Some(existing),
                _ => None,
            };
        }

        let id = NodeId(u32::try_from(self.nodes.len()).ok()?);
        let position = match &self.nodes[parent.index()].kind {
            NodeKind::Directory { ordered, .. } => ordered
                .binary_search_by(|child| {
                    self.nodes[child.index()]
                        .sort_key
                        .as_str()
                        .cmp(sort_key.as_str())
                })
                .unwrap_or_else(|pos| pos),
            NodeKind::File { .. } => return None,
        };

        let node = match payload {
            Some(payload) => Node {
                name: component.to_string(),
                sort_key,
                parent: Some(parent),
                kind: NodeKind::File { payload },
            },
            None => Node::directory(component.to_string(), sort_key, Some(parent)),
        };
        self.nodes.push(node);

        if let NodeKind::Directory { children, ordered } = &mut self.nodes[parent.index()].kind {
            children.insert(key, id);
            ordered.insert(position, id);
        }
        Some(id)
    }

    fn info(&self, id: NodeId, node: &Node) -> EntryInfo {
        EntryInfo {
            id,
            name: node.name.clone(),
            kind: match node.kind {
                NodeKind::Directory { .. } => EntryKind::Directory,
                NodeKind::File { .. } => EntryKind::File,
            },
            size: node.size(),
        }
    }

    fn insert_entries(&mut self, archive_path: &Path, entries: Vec<ArchiveEntry>) -> LoadedArchive {
        let mut summary = LoadedArchive {
            path: archive_path.to_path_buf(),
            added: 0,
            replaced: 0,
            skipped: 0,
        };

        for entry in entries {
            match self.insert(&entry.path, entry.payload) {
                InsertOutcome::Added(_) => summary.added += 1,
                InsertOutcome::Replaced(id) => {
                    debug!("{} overrides node {}", archive_path.display(), id);
                    summary.replaced += 1;
                }
                InsertOutcome::Skipped => summary.skipped += 1,
            }
        }
        summary
    }
}

impl<R: ArchiveReader> ContentIndex for TreeIndex<R> {
    fn load(&mut self, archive_path: &Path) -> Result<LoadedArchive> {
        let entries = self.reader.read_entries(archive_path)?;
        let summary = self.insert_entries(archive_path, entries);
        self.archives.push(archive_path.to_path_buf());

        info!(
            "Loaded {}: {} added, {} replaced, {} skipped",
            archive_path.display(),
            summary.added,
            summary.replaced,
            summary.skipped
        );
        Ok(summary)
    }

    fn total_size(&self) -> u64 {
        self.total_size
    }

    fn lookup(&self, path: &str) -> Option<NodeId> {
        components(path).try_fold(NodeId::ROOT, |current, component| {
            // Lookups never register: unknown names must not grow the registry
            let key = Name::hashed(component.to_lowercase().as_bytes());
            self.child(current, key)
        })
    }

    fn lookup_child(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        self.child(dir, Name::hashed(name.to_lowercase().as_bytes()))
    }

    fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.index())?.parent
    }

    fn entry(&self, id: NodeId) -> Option<EntryInfo> {
        self.nodes.get(id.index()).map(|node| self.info(id, node))
    }

    fn children(&self, id: NodeId) -> Option<Vec<EntryInfo>> {
        match &self.nodes.get(id.index())?.kind {
            NodeKind::Directory { ordered, .. } => Some(
                ordered
                    .iter()
                    .map(|child| self.info(*child, &self.nodes[child.index()]))
                    .collect(),
            ),
            NodeKind::File { .. } => None,
        }
    }

    fn payload(&self, id: NodeId) -> Result<Arc<dyn Payload>> {
        let node = self
            .nodes
            .get(id.index())
            .ok_or_else(|| IndexError::NotFound(id.to_string()))?;
        match &node.kind {
            NodeKind::File { payload } => Ok(Arc::clone(payload)),
            NodeKind::Directory { .. } => Err(IndexError::NotAFile(
                self.path_of(id).unwrap_or_else(|| id.to_string()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::MemoryPayload;
    use pretty_assertions::assert_eq;

    type NoReader = fn(&Path) -> Result<Vec<ArchiveEntry>>;

    fn no_archives(_: &Path) -> Result<Vec<ArchiveEntry>> {
        Ok(Vec::new())
    }

    fn index() -> TreeIndex<NoReader> {
        TreeIndex::with_resolver(no_archives as NoReader, Arc::new(NameResolver::new()))
    }

    fn bytes(data: &[u8]) -> Arc<dyn Payload> {
        Arc::new(MemoryPayload::new(data.to_vec()))
    }

    #[test]
    fn test_insert_creates_directories() {
        let mut tree = index();
        let outcome = tree.insert("base\\gameplay\\gui\\main.inkwidget", bytes(b"abc"));

        let InsertOutcome::Added(id) = outcome else {
            panic!("expected a new node, got {outcome:?}");
        };
        assert_eq!(tree.file_count(), 1);
        assert_eq!(tree.directory_count(), 4);
        assert_eq!(tree.total_size(), 3);
        assert_eq!(
            tree.path_of(id).as_deref(),
            Some("base\\gameplay\\gui\\main.inkwidget")
        );
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut tree = index();
        tree.insert("Base/Engine/Shaders.cache", bytes(b"x"));

        let id = tree.lookup("base\\engine\\SHADERS.CACHE").unwrap();
        assert_eq!(tree.lookup("/BASE/engine/shaders.cache"), Some(id));

        let entry = tree.entry(id).unwrap();
        assert_eq!(entry.name, "Shaders.cache");
        assert_eq!(entry.kind, EntryKind::File);
        assert!(tree.lookup("base/engine/missing").is_none());
    }

    #[test]
    fn test_lookup_child() {
        let mut tree = index();
        tree.insert("Base/Engine/Shaders.cache", bytes(b"x"));

        let base = tree.lookup_child(NodeId::ROOT, "BASE").unwrap();
        assert_eq!(tree.lookup("base"), Some(base));
        assert!(tree.lookup_child(base, "engine").is_some());
        assert!(tree.lookup_child(base, "missing").is_none());
        assert!(tree.lookup_child(NodeId(999), "base").is_none());
    }

    #[test]
    fn test_parent_links() {
        let mut tree = index();
        tree.insert("Base/Engine/Shaders.cache", bytes(b"x"));
        let base = tree.lookup("base").unwrap();
        let engine = tree.lookup("base/engine").unwrap();
        let file = tree.lookup("base/engine/shaders.cache").unwrap();

        assert_eq!(tree.parent(file), Some(engine));
        assert_eq!(tree.parent(engine), Some(base));
        assert_eq!(tree.parent(base), Some(NodeId::ROOT));
        assert_eq!(tree.parent(NodeId::ROOT), None);
        assert_eq!(tree.parent(NodeId(999)), None);
    }

    #[test]
    fn test_root_lookup() {
        let tree = index();
        assert_eq!(tree.lookup(""), Some(NodeId::ROOT));
        assert_eq!(tree.lookup("\\"), Some(NodeId::ROOT));
        assert!(tree.entry(NodeId::ROOT).unwrap().is_dir());
    }

    #[test]
    fn test_children_are_ordered() {
        let mut tree = index();
        for name in ["zeta.bin", "Alpha.bin", "beta.bin"] {
            tree.insert(&format!("dir/{name}"), bytes(b""));
        }
        tree.insert("dir/mid/inner.bin", bytes(b""));

        let dir = tree.lookup("dir").unwrap();
        let names: Vec<String> = tree
            .children(dir)
            .unwrap()
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, vec!["Alpha.bin", "beta.bin", "mid", "zeta.bin"]);
    }

    #[test]
    fn test_replace_adjusts_total_size() {
        let mut tree = index();
        let first = tree.insert("a/file.bin", bytes(&[0; 100]));
        let second = tree.insert("A/FILE.bin", bytes(&[0; 40]));

        let (InsertOutcome::Added(a), InsertOutcome::Replaced(b)) = (first, second) else {
            panic!("unexpected outcomes {first:?} {second:?}");
        };
        assert_eq!(a, b);
        assert_eq!(tree.total_size(), 40);
        assert_eq!(tree.file_count(), 1);
        // Original spelling of the first insert is kept
        assert_eq!(tree.entry(a).unwrap().name, "file.bin");
    }

    #[test]
    fn test_kind_conflicts_are_skipped() {
        let mut tree = index();
        tree.insert("a/b", bytes(b"file"));

        assert_eq!(tree.insert("a/b/c", bytes(b"x")), InsertOutcome::Skipped);
        assert_eq!(tree.insert("a", bytes(b"x")), InsertOutcome::Skipped);
        assert_eq!(tree.insert("", bytes(b"x")), InsertOutcome::Skipped);
        assert_eq!(tree.total_size(), 4);
    }

    #[test]
    fn test_payload_of_directory() {
        let mut tree = index();
        tree.insert("dir/file", bytes(b"data"));

        let dir = tree.lookup("dir").unwrap();
        assert!(matches!(tree.payload(dir), Err(IndexError::NotAFile(p)) if p == "dir"));
        assert!(matches!(
            tree.payload(NodeId(999)),
            Err(IndexError::NotFound(_))
        ));

        let file = tree.lookup("dir/file").unwrap();
        assert_eq!(tree.payload(file).unwrap().read_all().unwrap(), b"data");
        assert!(tree.children(file).is_none());
    }

    #[test]
    fn test_components_registered_lowercase() {
        let mut tree = index();
        tree.insert("Base/Textures", bytes(b""));

        let resolver = tree.resolver();
        assert!(resolver.contains(Name::from("base")));
        assert!(resolver.contains(Name::from("textures")));
        assert!(!resolver.contains(Name::from("Base")));
    }

    proptest::proptest! {
        /// Later writes to a path replace earlier ones in the size total
        #[test]
        fn total_size_tracks_last_write_per_path(
            writes in proptest::collection::vec(("[a-cA-C]/[a-cA-C]{1,2}", 0usize..64), 0..32)
        ) {
            let mut tree = index();
            let mut expected: HashMap<String, u64> = HashMap::new();
            for (path, size) in &writes {
                tree.insert(path, bytes(&vec![0; *size]));
                expected.insert(path.to_lowercase(), *size as u64);
            }

            proptest::prop_assert_eq!(tree.total_size(), expected.values().sum::<u64>());
            proptest::prop_assert_eq!(tree.file_count(), expected.len());
        }
    }
}
