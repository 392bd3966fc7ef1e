//! Lazily decoded file payloads
//!
//! Loading an archive only records where each file's bytes live. The bytes
//! are decoded the first time a reader asks for them.

use crate::codec::Codec;
use crate::{IndexError, Result};
use memmap2::Mmap;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Source of a file's decoded bytes
pub trait Payload: Send + Sync {
    /// Decoded size in bytes
    fn size(&self) -> u64;

    /// Decode the full payload
    ///
    /// # Errors
    ///
    /// Returns an error if the backing data cannot be read or decoded.
    fn read_all(&self) -> Result<Vec<u8>>;
}

/// Payload held in memory, already decoded
#[derive(Clone)]
pub struct MemoryPayload {
    data: Arc<[u8]>,
}

impl MemoryPayload {
    /// Wrap decoded bytes
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

impl fmt::Debug for MemoryPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPayload")
            .field("size", &self.data.len())
            .finish()
    }
}

impl Payload for MemoryPayload {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_all(&self) -> Result<Vec<u8>> {
        Ok(self.data.to_vec())
    }
}

/// Read-only memory map of an archive file
///
/// Shared by every [`Segment`] cut from the same archive.
pub struct MappedArchive {
    path: PathBuf,
    map: Mmap,
}

impl MappedArchive {
    /// Map an archive file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or mapped
    #[allow(unsafe_code)]
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        // SAFETY: archives are opened read-only and the volume never writes
        // them. External modification while mounted is unsupported.
        let map = unsafe { Mmap::map(&file)? };
        debug!("Mapped archive {} ({} bytes)", path.display(), map.len());
        Ok(Arc::new(Self { path, map }))
    }

    /// Path of the mapped file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Length of the mapped file
    pub fn len(&self) -> u64 {
        self.map.len() as u64
    }

    /// Whether the mapped file is empty
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Borrow `len` bytes at `offset`
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Archive`] if the range lies outside the file
    pub fn bytes(&self, offset: u64, len: u64) -> Result<&[u8]> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.len())
            .ok_or_else(|| {
                IndexError::Archive(format!(
                    "Range {offset}+{len} outside {} ({} bytes)",
                    self.path.display(),
                    self.len()
                ))
            })?;
        // Both bounds are <= map.len(), which is a usize
        Ok(&self.map[offset as usize..end as usize])
    }
}

impl fmt::Debug for MappedArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedArchive")
            .field("path", &self.path)
            .field("len", &self.map.len())
            .finish()
    }
}

/// Compressed byte range inside a mapped archive
#[derive(Clone)]
pub struct Segment {
    archive: Arc<MappedArchive>,
    offset: u64,
    stored_size: u64,
    size: u64,
    codec: Arc<dyn Codec>,
}

impl Segment {
    /// Describe `stored_size` bytes at `offset` that decode to `size` bytes
    pub fn new(
        archive: Arc<MappedArchive>,
        offset: u64,
        stored_size: u64,
        size: u64,
        codec: Arc<dyn Codec>,
    ) -> Self {
        Self {
            archive,
            offset,
            stored_size,
            size,
            codec,
        }
    }

    /// Offset of the stored bytes within the archive
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Size of the stored (compressed) bytes
    pub const fn stored_size(&self) -> u64 {
        self.stored_size
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("archive", &self.archive.path())
            .field("offset", &self.offset)
            .field("stored_size", &self.stored_size)
            .field("size", &self.size)
            .field("codec", &self.codec.name())
            .finish()
    }
}

impl Payload for Segment {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_all(&self) -> Result<Vec<u8>> {
        if !self.codec.is_available() {
            return Err(IndexError::CodecUnavailable(self.codec.name().to_string()));
        }
        let stored = self.archive.bytes(self.offset, self.stored_size)?;
        // Entries whose stored size equals their decoded size are not compressed
        if self.stored_size == self.size {
            return Ok(stored.to_vec());
        }
        self.codec.decompress(stored, self.size)
    }
}
