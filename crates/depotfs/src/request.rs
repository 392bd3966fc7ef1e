//! Per-request handling for a mounted volume
//!
//! Host dispatcher threads call into a [`RequestHandler`]. The session's
//! handler, [`VolumeRequests`], resolves paths and handles against the
//! shared content index. File bytes are decoded on the first read of an
//! open file and cached on its [`FileContext`].

use crate::volume::VolumeParams;
use bitflags::bitflags;
use depotfs_index::{ContentIndex, EntryInfo, NodeId, Payload};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

bitflags! {
    /// File attributes reported to the host
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FileAttributes: u32 {
        /// Contents cannot be modified
        const READONLY = 0x0000_0001;
        /// Entry is a directory
        const DIRECTORY = 0x0000_0010;
        /// Regular file
        const ARCHIVE = 0x0000_0020;
    }
}

/// Failure of a single filesystem request
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsStatus {
    #[error("object name not found")]
    ObjectNameNotFound,

    #[error("object path not found")]
    ObjectPathNotFound,

    #[error("not a directory")]
    NotADirectory,

    #[error("file is a directory")]
    FileIsADirectory,

    #[error("end of file")]
    EndOfFile,

    #[error("media is write protected")]
    MediaWriteProtected,

    #[error("invalid parameter")]
    InvalidParameter,

    #[error("device not ready")]
    DeviceNotReady,

    #[error("data error")]
    DataError,
}

impl FsStatus {
    /// NTSTATUS value for Windows hosts
    #[allow(clippy::cast_possible_wrap)]
    pub const fn ntstatus(self) -> i32 {
        let code: u32 = match self {
            Self::ObjectNameNotFound => 0xC000_0034,
            Self::ObjectPathNotFound => 0xC000_003A,
            Self::NotADirectory => 0xC000_0103,
            Self::FileIsADirectory => 0xC000_00BA,
            Self::EndOfFile => 0xC000_0011,
            Self::MediaWriteProtected => 0xC000_00A2,
            Self::InvalidParameter => 0xC000_000D,
            Self::DeviceNotReady => 0xC000_00A3,
            Self::DataError => 0xC000_003E,
        };
        code as i32
    }

    /// errno value for POSIX hosts
    pub const fn errno(self) -> i32 {
        match self {
            Self::ObjectNameNotFound | Self::ObjectPathNotFound => 2, // ENOENT
            Self::NotADirectory => 20,                                // ENOTDIR
            Self::FileIsADirectory => 21,                             // EISDIR
            Self::EndOfFile => 0,
            Self::MediaWriteProtected => 30, // EROFS
            Self::InvalidParameter => 22,    // EINVAL
            Self::DeviceNotReady => 19,      // ENODEV
            Self::DataError => 5,            // EIO
        }
    }
}

/// Kinds of mutating request, all of which a read-only volume denies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mutation {
    Create,
    Overwrite,
    Write,
    SetBasicInfo,
    SetFileSize,
    Rename,
    SetSecurity,
    SetDelete,
    CanDelete,
    Flush,
}

impl Mutation {
    /// Every mutation kind
    pub const ALL: [Self; 10] = [
        Self::Create,
        Self::Overwrite,
        Self::Write,
        Self::SetBasicInfo,
        Self::SetFileSize,
        Self::Rename,
        Self::SetSecurity,
        Self::SetDelete,
        Self::CanDelete,
        Self::Flush,
    ];
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Metadata of a file or directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub attributes: FileAttributes,
    pub file_size: u64,
    pub allocation_size: u64,
    /// Timestamps are 100 ns intervals since 1601-01-01
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub change_time: u64,
    /// Stable per-node identifier
    pub index_number: u64,
}

/// One directory enumeration entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirInfo {
    pub name: String,
    pub info: FileInfo,
}

/// Volume-wide size and label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub total_size: u64,
    pub free_size: u64,
    pub volume_label: String,
}

/// One data stream of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Stream name, empty for the unnamed data stream
    pub name: String,
    pub size: u64,
    pub allocation_size: u64,
}

/// State of one open file or directory
pub struct FileContext {
    entry: EntryInfo,
    payload: Option<Arc<dyn Payload>>,
    data: Mutex<Option<Arc<[u8]>>>,
}

impl FileContext {
    fn new(entry: EntryInfo, payload: Option<Arc<dyn Payload>>) -> Self {
        Self {
            entry,
            payload,
            data: Mutex::new(None),
        }
    }

    /// Node this context refers to
    pub const fn node(&self) -> NodeId {
        self.entry.id
    }

    /// Index metadata captured at open time
    pub const fn entry(&self) -> &EntryInfo {
        &self.entry
    }

    /// Whether the contents have been decoded yet
    pub fn is_decoded(&self) -> bool {
        self.data.lock().is_some()
    }

    fn decoded(&self) -> Result<Arc<[u8]>, FsStatus> {
        let Some(payload) = &self.payload else {
            return Err(FsStatus::FileIsADirectory);
        };

        let mut data = self.data.lock();
        if let Some(bytes) = data.as_ref() {
            return Ok(Arc::clone(bytes));
        }

        let bytes: Arc<[u8]> = payload
            .read_all()
            .map_err(|e| {
                warn!("Failed to decode {}: {}", self.entry.name, e);
                FsStatus::DataError
            })?
            .into();
        debug!("Decoded {} ({} bytes)", self.entry.name, bytes.len());
        *data = Some(Arc::clone(&bytes));
        Ok(bytes)
    }
}

impl fmt::Debug for FileContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileContext")
            .field("entry", &self.entry)
            .field("decoded", &self.is_decoded())
            .finish()
    }
}

/// Handler for the requests a host dispatcher delivers
///
/// Methods are called concurrently from host threads.
pub trait RequestHandler: Send + Sync {
    /// Volume size and label
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotReady` once the volume is stopped
    fn volume_info(&self) -> Result<VolumeInfo, FsStatus>;

    /// Open a file or directory by path
    ///
    /// # Errors
    ///
    /// Returns `ObjectNameNotFound` or `ObjectPathNotFound` for unknown paths
    fn open(&self, path: &str) -> Result<FileContext, FsStatus>;

    /// Open a file or directory by node
    ///
    /// # Errors
    ///
    /// Returns `ObjectNameNotFound` for unknown nodes
    fn open_node(&self, node: NodeId) -> Result<FileContext, FsStatus>;

    /// Resolve one child of a directory
    ///
    /// # Errors
    ///
    /// Returns `NotADirectory` when `dir` is a file and
    /// `ObjectNameNotFound` when no child matches
    fn lookup_child(&self, dir: NodeId, name: &str) -> Result<EntryInfo, FsStatus>;

    /// Metadata of an open file
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotReady` once the volume is stopped
    fn file_info(&self, ctx: &FileContext) -> Result<FileInfo, FsStatus>;

    /// Copy file bytes starting at `offset` into `buf`
    ///
    /// # Errors
    ///
    /// Returns `EndOfFile` when `offset` is at or past the end,
    /// `FileIsADirectory` for directories and `DataError` when the payload
    /// cannot be decoded
    fn read(&self, ctx: &FileContext, offset: u64, buf: &mut [u8]) -> Result<usize, FsStatus>;

    /// Enumerate a directory
    ///
    /// Entries come in case-insensitive name order, restricted to those
    /// strictly after `marker` and matching the `*`/`?` `pattern`.
    ///
    /// # Errors
    ///
    /// Returns `NotADirectory` for files
    fn read_directory(
        &self,
        ctx: &FileContext,
        pattern: Option<&str>,
        marker: Option<&str>,
    ) -> Result<Vec<DirInfo>, FsStatus>;

    /// Data streams of an open file
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotReady` once the volume is stopped
    fn stream_info(&self, ctx: &FileContext) -> Result<Vec<StreamInfo>, FsStatus>;

    /// Release an open file
    fn close(&self, ctx: FileContext);

    /// Deny a mutating request
    fn reject(&self, op: Mutation, path: &str) -> FsStatus {
        debug!("Denied {} on {}", op, path);
        FsStatus::MediaWriteProtected
    }
}

/// State shared between a session and the requests it serves
pub(crate) struct SessionShared<I> {
    pub(crate) index: RwLock<I>,
    pub(crate) accepting: AtomicBool,
    pub(crate) params: VolumeParams,
}

impl<I> SessionShared<I> {
    pub(crate) fn new(index: I, params: VolumeParams) -> Self {
        Self {
            index: RwLock::new(index),
            accepting: AtomicBool::new(false),
            params,
        }
    }
}

/// Request handler backed by a session's content index
pub struct VolumeRequests<I> {
    shared: Arc<SessionShared<I>>,
}

impl<I: ContentIndex> VolumeRequests<I> {
    pub(crate) const fn new(shared: Arc<SessionShared<I>>) -> Self {
        Self { shared }
    }

    fn ensure_ready(&self) -> Result<(), FsStatus> {
        if self.shared.accepting.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(FsStatus::DeviceNotReady)
        }
    }

    fn info_for(&self, entry: &EntryInfo) -> FileInfo {
        let params = &self.shared.params;
        let time = params.volume_creation_time;
        let attributes = if entry.is_dir() {
            FileAttributes::DIRECTORY | FileAttributes::READONLY
        } else {
            FileAttributes::ARCHIVE | FileAttributes::READONLY
        };

        FileInfo {
            attributes,
            file_size: entry.size,
            allocation_size: entry.size.div_ceil(params.allocation_unit()) * params.allocation_unit(),
            creation_time: time,
            last_access_time: time,
            last_write_time: time,
            change_time: time,
            index_number: u64::from(entry.id.0),
        }
    }

    fn context_for(&self, index: &I, entry: EntryInfo) -> Result<FileContext, FsStatus> {
        let payload = if entry.is_dir() {
            None
        } else {
            Some(index.payload(entry.id).map_err(|e| {
                warn!("No payload for {}: {}", entry.name, e);
                FsStatus::DataError
            })?)
        };
        Ok(FileContext::new(entry, payload))
    }
}

fn split_parent(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches(['/', '\\']);
    trimmed
        .rfind(['/', '\\'])
        .map_or(("", trimmed), |at| (&trimmed[..at], &trimmed[at + 1..]))
}

/// Case-insensitive match of `name` against a `*`/`?` wildcard pattern
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let name: Vec<char> = name.to_lowercase().chars().collect();

    let (mut p, mut n) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while n < name.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, n));
                p += 1;
            }
            Some(&c) if c == '?' || c == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    n = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

impl<I: ContentIndex> RequestHandler for VolumeRequests<I> {
    fn volume_info(&self) -> Result<VolumeInfo, FsStatus> {
        self.ensure_ready()?;
        Ok(VolumeInfo {
            total_size: self.shared.index.read().total_size(),
            free_size: 0,
            volume_label: self.shared.params.volume_label.clone(),
        })
    }

    fn open(&self, path: &str) -> Result<FileContext, FsStatus> {
        self.ensure_ready()?;
        let index = self.shared.index.read();

        let Some(id) = index.lookup(path) else {
            let (parent, _) = split_parent(path);
            let parent_is_dir = index
                .lookup(parent)
                .and_then(|id| index.entry(id))
                .is_some_and(|entry| entry.is_dir());
            return Err(if parent_is_dir {
                FsStatus::ObjectNameNotFound
            } else {
                FsStatus::ObjectPathNotFound
            });
        };

        let entry = index.entry(id).ok_or(FsStatus::ObjectNameNotFound)?;
        self.context_for(&index, entry)
    }

    fn open_node(&self, node: NodeId) -> Result<FileContext, FsStatus> {
        self.ensure_ready()?;
        let index = self.shared.index.read();
        let entry = index.entry(node).ok_or(FsStatus::ObjectNameNotFound)?;
        self.context_for(&index, entry)
    }

    fn lookup_child(&self, dir: NodeId, name: &str) -> Result<EntryInfo, FsStatus> {
        self.ensure_ready()?;
        let index = self.shared.index.read();
        let parent = index.entry(dir).ok_or(FsStatus::ObjectPathNotFound)?;
        if !parent.is_dir() {
            return Err(FsStatus::NotADirectory);
        }
        index
            .lookup_child(dir, name)
            .and_then(|id| index.entry(id))
            .ok_or(FsStatus::ObjectNameNotFound)
    }

    fn file_info(&self, ctx: &FileContext) -> Result<FileInfo, FsStatus> {
        self.ensure_ready()?;
        Ok(self.info_for(&ctx.entry))
    }

    fn read(&self, ctx: &FileContext, offset: u64, buf: &mut [u8]) -> Result<usize, FsStatus> {
        self.ensure_ready()?;
        if ctx.entry.is_dir() {
            return Err(FsStatus::FileIsADirectory);
        }
        if offset >= ctx.entry.size {
            return Err(FsStatus::EndOfFile);
        }

        let data = ctx.decoded()?;
        let start = usize::try_from(offset).map_err(|_| FsStatus::EndOfFile)?;
        if start >= data.len() {
            return Err(FsStatus::EndOfFile);
        }

        let count = buf.len().min(data.len() - start);
        buf[..count].copy_from_slice(&data[start..start + count]);
        Ok(count)
    }

    fn read_directory(
        &self,
        ctx: &FileContext,
        pattern: Option<&str>,
        marker: Option<&str>,
    ) -> Result<Vec<DirInfo>, FsStatus> {
        self.ensure_ready()?;
        if !ctx.entry.is_dir() {
            return Err(FsStatus::NotADirectory);
        }

        let index = self.shared.index.read();
        let children = index
            .children(ctx.entry.id)
            .ok_or(FsStatus::NotADirectory)?;

        let pattern = pattern.filter(|p| !p.is_empty() && *p != "*");
        let keep = |name: &str| pattern.is_none_or(|p| matches_pattern(p, name));
        let mut entries = Vec::new();

        // "." and ".." lead every non-root listing
        if ctx.entry.id != NodeId::ROOT {
            let own = self.info_for(&ctx.entry);
            let parent = index
                .parent(ctx.entry.id)
                .and_then(|id| index.entry(id))
                .map_or(own, |entry| self.info_for(&entry));
            let dots: &[(&str, FileInfo)] = match marker {
                None => &[(".", own), ("..", parent)],
                Some(".") => &[("..", parent)],
                Some(_) => &[],
            };
            entries.extend(
                dots.iter()
                    .filter(|dot| keep(dot.0))
                    .map(|(name, info)| DirInfo {
                        name: (*name).to_string(),
                        info: *info,
                    }),
            );
        }

        let after = marker
            .filter(|m| *m != "." && *m != "..")
            .map(str::to_lowercase);
        entries.extend(
            children
                .iter()
                .filter(|child| {
                    after
                        .as_deref()
                        .is_none_or(|after| child.name.to_lowercase().as_str() > after)
                })
                .filter(|child| keep(child.name.as_str()))
                .map(|child| DirInfo {
                    name: child.name.clone(),
                    info: self.info_for(child),
                }),
        );

        Ok(entries)
    }

    fn stream_info(&self, ctx: &FileContext) -> Result<Vec<StreamInfo>, FsStatus> {
        self.ensure_ready()?;
        if ctx.entry.is_dir() {
            return Ok(Vec::new());
        }
        let info = self.info_for(&ctx.entry);
        Ok(vec![StreamInfo {
            name: String::new(),
            size: info.file_size,
            allocation_size: info.allocation_size,
        }])
    }

    fn close(&self, ctx: FileContext) {
        debug!("Closed {} ({})", ctx.entry.name, ctx.entry.id);
    }

    fn reject(&self, op: Mutation, path: &str) -> FsStatus {
        if let Err(status) = self.ensure_ready() {
            return status;
        }
        debug!("Denied {} on {}", op, path);
        FsStatus::MediaWriteProtected
    }
}
