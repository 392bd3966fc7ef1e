//! Content index contract
//!
//! The filesystem session only talks to the index through [`ContentIndex`].
//! Archive container parsing is behind [`ArchiveReader`], so the index does
//! not depend on any particular on-disk format.

use crate::Result;
use crate::payload::Payload;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identifier of a node in the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The root directory
    pub const ROOT: Self = Self(0);

    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of an index node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Directory with child entries
    Directory,
    /// Regular file with a payload
    File,
}

/// Metadata for one index node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Node identifier
    pub id: NodeId,
    /// Display name, original case preserved (empty for the root)
    pub name: String,
    /// Directory or file
    pub kind: EntryKind,
    /// Decoded size in bytes (0 for directories)
    pub size: u64,
}

impl EntryInfo {
    /// Whether this entry is a directory
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Summary of one archive load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedArchive {
    /// Archive path as given to `load`
    pub path: PathBuf,
    /// Entries added as new files
    pub added: usize,
    /// Entries that replaced a file from an earlier archive
    pub replaced: usize,
    /// Entries skipped because their path conflicts with the tree
    pub skipped: usize,
}

/// Hierarchical namespace assembled from archives
///
/// Implementations are shared with filesystem request threads once the
/// volume is running, hence `Send + Sync`. `load` is only called before the
/// volume starts.
pub trait ContentIndex: Send + Sync {
    /// Add the entries of one archive
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be read; the index is left
    /// unchanged in that case.
    fn load(&mut self, archive_path: &Path) -> Result<LoadedArchive>;

    /// Total decoded size of all files
    fn total_size(&self) -> u64;

    /// Resolve a path (`/` or `\` separated, case-insensitive)
    fn lookup(&self, path: &str) -> Option<NodeId>;

    /// Resolve one child of a directory by name, case-insensitively
    fn lookup_child(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        let wanted = name.to_lowercase();
        self.children(dir)?
            .into_iter()
            .find(|child| child.name.to_lowercase() == wanted)
            .map(|child| child.id)
    }

    /// Directory containing a node
    ///
    /// Returns `None` for the root and for unknown nodes.
    fn parent(&self, _id: NodeId) -> Option<NodeId> {
        None
    }

    /// Metadata of a node
    fn entry(&self, id: NodeId) -> Option<EntryInfo>;

    /// Children of a directory, ordered case-insensitively by name
    ///
    /// Returns `None` if `id` is unknown or not a directory.
    fn children(&self, id: NodeId) -> Option<Vec<EntryInfo>>;

    /// Payload of a file
    ///
    /// # Errors
    ///
    /// Returns [`crate::IndexError::NotFound`] for unknown nodes and
    /// [`crate::IndexError::NotAFile`] for directories.
    fn payload(&self, id: NodeId) -> Result<Arc<dyn Payload>>;
}

/// One file entry produced by an archive reader
#[derive(Clone)]
pub struct ArchiveEntry {
    /// Path inside the volume
    pub path: String,
    /// Payload providing the decoded bytes
    pub payload: Arc<dyn Payload>,
}

impl ArchiveEntry {
    /// Create an entry
    pub fn new(path: impl Into<String>, payload: Arc<dyn Payload>) -> Self {
        Self {
            path: path.into(),
            payload,
        }
    }
}

impl fmt::Debug for ArchiveEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveEntry")
            .field("path", &self.path)
            .field("size", &self.payload.size())
            .finish()
    }
}

/// Decoder for an archive container format
pub trait ArchiveReader: Send + Sync {
    /// List the file entries of the archive at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be opened or parsed.
    fn read_entries(&self, path: &Path) -> Result<Vec<ArchiveEntry>>;
}

impl<F> ArchiveReader for F
where
    F: Fn(&Path) -> Result<Vec<ArchiveEntry>> + Send + Sync,
{
    fn read_entries(&self, path: &Path) -> Result<Vec<ArchiveEntry>> {
        self(path)
    }
}
