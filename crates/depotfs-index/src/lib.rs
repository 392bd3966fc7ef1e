//! Content index for depotfs volumes.
//!
//! The index is the namespace a mounted volume exposes: a tree of
//! directories and files assembled from one or more packed archives. Later
//! archives override files provided by earlier ones, which is how patch
//! archives replace base content.
//!
//! - [`ContentIndex`] is the contract the filesystem session relies on.
//! - [`TreeIndex`] implements it, interning every path component through
//!   a [`depotfs_name::NameResolver`].
//! - [`ArchiveReader`] is the seam for archive container formats. Readers
//!   return [`ArchiveEntry`] values whose [`Payload`] decodes lazily.
//! - [`Codec`] decodes compressed payloads; [`ZlibCodec`] is provided.
//!
//! # Example
//!
//! ```
//! use depotfs_index::{ArchiveEntry, ContentIndex, MemoryPayload, Result, TreeIndex};
//! use depotfs_name::NameResolver;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let reader = |_: &Path| -> Result<Vec<ArchiveEntry>> {
//!     Ok(vec![ArchiveEntry::new(
//!         "base\\readme.txt",
//!         Arc::new(MemoryPayload::new(b"hello".to_vec())),
//!     )])
//! };
//!
//! let mut index = TreeIndex::with_resolver(reader, Arc::new(NameResolver::new()));
//! index.load(Path::new("basegame.archive"))?;
//!
//! assert_eq!(index.total_size(), 5);
//! assert!(index.lookup("BASE/README.TXT").is_some());
//! # Ok::<(), depotfs_index::IndexError>(())
//! ```

#![warn(missing_docs)]

use thiserror::Error;

pub mod codec;
pub mod index;
pub mod payload;
pub mod tree;

pub use codec::{Codec, MAX_DECOMPRESSED_SIZE, StoredCodec, ZlibCodec};
pub use index::{
    ArchiveEntry, ArchiveReader, ContentIndex, EntryInfo, EntryKind, LoadedArchive, NodeId,
};
pub use payload::{MappedArchive, MemoryPayload, Payload, Segment};
pub use tree::{InsertOutcome, TreeIndex};

/// Result type for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors that can occur while building or reading the index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive could not be parsed or addressed.
    #[error("Archive error: {0}")]
    Archive(String),

    /// Payload could not be decoded.
    #[error("Decompression failed: {0}")]
    Decompression(String),

    /// Decoded payload length differs from the declared size.
    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Declared size
        expected: u64,
        /// Decoded size
        actual: u64,
    },

    /// Node not found.
    #[error("Entry not found: {0}")]
    NotFound(String),

    /// Node is a directory where a file was required.
    #[error("Not a file: {0}")]
    NotAFile(String),

    /// Codec cannot be used in this process.
    #[error("Codec unavailable: {0}")]
    CodecUnavailable(String),
}
