//! FUSE host binding
//!
//! [`FuseHost`] mounts a volume with `fuser`. Inode numbers are node ids
//! plus one, so the index root is the FUSE root inode.

use crate::host::{HostFramework, HostStatus, VolumeHandle};
use crate::request::{
    DirInfo, FileAttributes, FileContext, FileInfo, FsStatus, Mutation, RequestHandler,
};
use crate::volume::{VolumeParams, from_file_time};
use depotfs_index::NodeId;
use fuser::{
    BackgroundSession, FileAttr, FileType, Filesystem, KernelConfig, MountOption, ReplyAttr,
    ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs,
    ReplyWrite, Request, TimeOrNow,
};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Block size reported to `stat` and `statfs`
const BLOCK_SIZE: u32 = 512;

const fn to_ino(node: NodeId) -> u64 {
    node.0 as u64 + 1
}

fn to_node(ino: u64) -> Option<NodeId> {
    ino.checked_sub(1)
        .and_then(|id| u32::try_from(id).ok())
        .map(NodeId)
}

/// Host framework backed by the kernel FUSE driver
#[derive(Debug, Clone)]
pub struct FuseHost {
    device: PathBuf,
    allow_other: bool,
}

impl Default for FuseHost {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/fuse"),
            allow_other: false,
        }
    }
}

impl FuseHost {
    /// Create a host using `/dev/fuse`
    pub fn new() -> Self {
        Self::default()
    }

    /// Let other users access the mount
    #[must_use]
    pub const fn with_allow_other(mut self, allow_other: bool) -> Self {
        self.allow_other = allow_other;
        self
    }
}

impl HostFramework for FuseHost {
    fn name(&self) -> &str {
        "fuse"
    }

    fn load(&self) -> Result<(), HostStatus> {
        if self.device.exists() {
            Ok(())
        } else {
            warn!("FUSE device {} not found", self.device.display());
            Err(HostStatus::DLL_NOT_FOUND)
        }
    }

    fn create_volume(
        &self,
        params: &VolumeParams,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Box<dyn VolumeHandle>, HostStatus> {
        Ok(Box::new(FuseVolume {
            params: params.clone(),
            handler,
            allow_other: self.allow_other,
            mount_point: None,
            session: None,
            debug_level: 0,
        }))
    }
}

struct FuseVolume {
    params: VolumeParams,
    handler: Arc<dyn RequestHandler>,
    allow_other: bool,
    mount_point: Option<PathBuf>,
    session: Option<BackgroundSession>,
    debug_level: u32,
}

impl FuseVolume {
    fn options(&self) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::FSName(self.params.file_system_name.to_lowercase()),
            MountOption::AutoUnmount,
            MountOption::DefaultPermissions,
            MountOption::RO,
        ];
        if self.allow_other {
            options.push(MountOption::AllowOther);
        } else {
            options.push(MountOption::AllowRoot);
        }
        options
    }
}

impl VolumeHandle for FuseVolume {
    fn set_mount_point(&mut self, mount_point: Option<&str>) -> Result<(), HostStatus> {
        let path = match mount_point {
            Some(path) => PathBuf::from(path),
            None => {
                let path = std::env::temp_dir().join(format!("depotfs-{}", std::process::id()));
                std::fs::create_dir_all(&path).map_err(|e| {
                    warn!("Cannot create mount point {}: {}", path.display(), e);
                    HostStatus::UNSUCCESSFUL
                })?;
                path
            }
        };

        if !path.is_dir() {
            return Err(HostStatus::NOT_FOUND);
        }
        self.mount_point = Some(path);
        Ok(())
    }

    fn mount_point(&self) -> Option<String> {
        self.mount_point
            .as_ref()
            .map(|path| path.display().to_string())
    }

    fn set_debug_log(&mut self, level: u32) {
        self.debug_level = level;
    }

    fn start_dispatcher(&mut self) -> Result<(), HostStatus> {
        if self.session.is_some() {
            return Ok(());
        }
        let Some(mount_point) = self.mount_point.clone() else {
            return Err(HostStatus::NOT_FOUND);
        };

        let adapter = FuseAdapter::new(Arc::clone(&self.handler), self.debug_level);
        let session = fuser::spawn_mount2(adapter, &mount_point, &self.options()).map_err(|e| {
            warn!("FUSE mount at {} failed: {}", mount_point.display(), e);
            HostStatus::UNSUCCESSFUL
        })?;

        info!("Mounted {} at {}", self.params.volume_label, mount_point.display());
        self.session = Some(session);
        Ok(())
    }

    fn stop_dispatcher(&mut self) {
        if let Some(session) = self.session.take() {
            // Dropping the background session unmounts
            drop(session);
            debug!("FUSE session joined");
        }
    }
}

impl Drop for FuseVolume {
    fn drop(&mut self) {
        self.stop_dispatcher();
    }
}

/// One `readdir` reply entry
#[derive(Debug, Clone, PartialEq, Eq)]
struct DirEntry {
    ino: u64,
    kind: FileType,
    name: String,
}

/// Turn a handler listing into `readdir` entries
///
/// The root listing carries no dot entries, so both point at the root here.
fn directory_entries(ino: u64, is_root: bool, listing: Vec<DirInfo>) -> Vec<DirEntry> {
    let mut entries = Vec::with_capacity(listing.len() + 2);
    if is_root {
        for name in [".", ".."] {
            entries.push(DirEntry {
                ino,
                kind: FileType::Directory,
                name: name.to_string(),
            });
        }
    }
    entries.extend(listing.into_iter().map(|entry| DirEntry {
        ino: entry.info.index_number + 1,
        kind: if entry.info.attributes.contains(FileAttributes::DIRECTORY) {
            FileType::Directory
        } else {
            FileType::RegularFile
        },
        name: entry.name,
    }));
    entries
}

/// Entries after the first `skip`, each paired with the offset of its successor
fn page(entries: Vec<DirEntry>, skip: usize) -> impl Iterator<Item = (i64, DirEntry)> {
    entries
        .into_iter()
        .enumerate()
        .skip(skip)
        .map(|(i, entry)| (i64::try_from(i + 1).unwrap_or(i64::MAX), entry))
}

/// Bytes to reply for a read, reading at or past the end as an empty reply
fn read_count(result: Result<usize, FsStatus>) -> Result<usize, i32> {
    match result {
        Ok(count) => Ok(count),
        Err(FsStatus::EndOfFile) => Ok(0),
        Err(status) => Err(status.errno()),
    }
}

fn file_attr(ino: u64, info: &FileInfo, req: &Request<'_>) -> FileAttr {
    let is_dir = info.attributes.contains(FileAttributes::DIRECTORY);
    let time = from_file_time(info.creation_time);

    FileAttr {
        ino,
        size: info.file_size,
        blocks: info.allocation_size.div_ceil(u64::from(BLOCK_SIZE)),
        atime: time,
        mtime: time,
        ctime: time,
        crtime: time,
        kind: if is_dir {
            FileType::Directory
        } else {
            FileType::RegularFile
        },
        perm: if is_dir { 0o555 } else { 0o444 },
        nlink: if is_dir { 2 } else { 1 },
        uid: req.uid(),
        gid: req.gid(),
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

/// Adapts a [`RequestHandler`] to `fuser::Filesystem`
struct FuseAdapter {
    handler: Arc<dyn RequestHandler>,
    ttl: Duration,
    open: HashMap<u64, FileContext>,
    next_fh: u64,
    debug_level: u32,
}

impl FuseAdapter {
    fn new(handler: Arc<dyn RequestHandler>, debug_level: u32) -> Self {
        Self {
            handler,
            ttl: Duration::from_secs(1),
            open: HashMap::new(),
            next_fh: 1,
            debug_level,
        }
    }

    fn info(&self, ino: u64) -> Result<FileInfo, FsStatus> {
        let node = to_node(ino).ok_or(FsStatus::ObjectNameNotFound)?;
        let ctx = self.handler.open_node(node)?;
        let info = self.handler.file_info(&ctx);
        self.handler.close(ctx);
        info
    }

    fn register(&mut self, ctx: FileContext) -> u64 {
        let fh = self.next_fh;
        self.next_fh += 1;
        self.open.insert(fh, ctx);
        fh
    }

    fn deny(&self, op: Mutation, target: &str) -> i32 {
        self.handler.reject(op, target).errno()
    }
}

impl Filesystem for FuseAdapter {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        if self.debug_level > 0 {
            debug!("FUSE session initialized (debug level {})", self.debug_level);
        }
        Ok(())
    }

    fn destroy(&mut self) {
        for (_, ctx) in self.open.drain() {
            self.handler.close(ctx);
        }
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(dir) = to_node(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };

        let result = self
            .handler
            .lookup_child(dir, name)
            .and_then(|entry| Ok((entry.id, self.info(to_ino(entry.id))?)));
        match result {
            Ok((id, info)) => reply.entry(&self.ttl, &file_attr(to_ino(id), &info, req), 0),
            Err(status) => reply.error(status.errno()),
        }
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.info(ino) {
            Ok(info) => reply.attr(&self.ttl, &file_attr(ino, &info, req)),
            Err(status) => reply.error(status.errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            reply.error(self.deny(Mutation::Write, &ino.to_string()));
            return;
        }
        let Some(node) = to_node(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        match self.handler.open_node(node) {
            Ok(ctx) if ctx.entry().is_dir() => {
                self.handler.close(ctx);
                reply.error(libc::EISDIR);
            }
            Ok(ctx) => {
                let fh = self.register(ctx);
                reply.opened(fh, 0);
            }
            Err(status) => reply.error(status.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(ctx) = self.open.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };

        let mut buf = vec![0u8; size as usize];
        match read_count(self.handler.read(ctx, offset, &mut buf)) {
            Ok(count) => reply.data(&buf[..count]),
            Err(errno) => reply.error(errno),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        if let Some(ctx) = self.open.remove(&fh) {
            self.handler.close(ctx);
        }
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(node) = to_node(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        match self.handler.open_node(node) {
            Ok(ctx) if ctx.entry().is_dir() => {
                let fh = self.register(ctx);
                reply.opened(fh, 0);
            }
            Ok(ctx) => {
                self.handler.close(ctx);
                reply.error(libc::ENOTDIR);
            }
            Err(status) => reply.error(status.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Ok(skip) = usize::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(ctx) = self.open.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };

        let listing = match self.handler.read_directory(ctx, None, None) {
            Ok(listing) => listing,
            Err(status) => {
                reply.error(status.errno());
                return;
            }
        };

        let entries = directory_entries(ino, ctx.node() == NodeId::ROOT, listing);
        for (next, entry) in page(entries, skip) {
            if reply.add(entry.ino, next, entry.kind, &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        if let Some(ctx) = self.open.remove(&fh) {
            self.handler.close(ctx);
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        match self.handler.volume_info() {
            Ok(volume) => reply.statfs(
                volume.total_size.div_ceil(u64::from(BLOCK_SIZE)),
                0,
                0,
                0,
                0,
                BLOCK_SIZE,
                255,
                BLOCK_SIZE,
            ),
            Err(status) => reply.error(status.errno()),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        if mask & libc::W_OK != 0 {
            reply.error(self.deny(Mutation::Write, &ino.to_string()));
            return;
        }
        match self.info(ino) {
            Ok(_) => reply.ok(),
            Err(status) => reply.error(status.errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let op = if size.is_some() {
            Mutation::SetFileSize
        } else {
            Mutation::SetBasicInfo
        };
        reply.error(self.deny(op, &ino.to_string()));
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        reply.error(self.deny(Mutation::Create, &name.to_string_lossy()));
    }

    fn unlink(&mut self, _req: &Request<'_>, _parent: u64, name: &OsStr, reply: ReplyEmpty) {
        reply.error(self.deny(Mutation::SetDelete, &name.to_string_lossy()));
    }

    fn rmdir(&mut self, _req: &Request<'_>, _parent: u64, name: &OsStr, reply: ReplyEmpty) {
        reply.error(self.deny(Mutation::SetDelete, &name.to_string_lossy()));
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        name: &OsStr,
        _newparent: u64,
        _newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(self.deny(Mutation::Rename, &name.to_string_lossy()));
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _offset: i64,
        _data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        reply.error(self.deny(Mutation::Write, &ino.to_string()));
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        reply.error(self.deny(Mutation::Create, &name.to_string_lossy()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_inode_mapping() {
        assert_eq!(to_ino(NodeId::ROOT), fuser::FUSE_ROOT_ID);
        assert_eq!(to_node(fuser::FUSE_ROOT_ID), Some(NodeId::ROOT));
        assert_eq!(to_node(0), None);
        assert_eq!(to_node(42), Some(NodeId(41)));
    }

    fn dir_info(name: &str, index_number: u64, attributes: FileAttributes) -> DirInfo {
        DirInfo {
            name: name.to_string(),
            info: FileInfo {
                attributes,
                file_size: 0,
                allocation_size: 0,
                creation_time: 0,
                last_access_time: 0,
                last_write_time: 0,
                change_time: 0,
                index_number,
            },
        }
    }

    #[test]
    fn test_directory_entries() {
        let dir = FileAttributes::DIRECTORY | FileAttributes::READONLY;
        let file = FileAttributes::ARCHIVE | FileAttributes::READONLY;

        let nested = directory_entries(
            8,
            false,
            vec![
                dir_info(".", 7, dir),
                dir_info("..", 2, dir),
                dir_info("readme.txt", 9, file),
            ],
        );
        let summary: Vec<(u64, FileType, &str)> = nested
            .iter()
            .map(|e| (e.ino, e.kind, e.name.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (8, FileType::Directory, "."),
                (3, FileType::Directory, ".."),
                (10, FileType::RegularFile, "readme.txt"),
            ]
        );

        let root = directory_entries(1, true, vec![dir_info("base", 1, dir)]);
        let names: Vec<(u64, &str)> = root.iter().map(|e| (e.ino, e.name.as_str())).collect();
        assert_eq!(names, vec![(1, "."), (1, ".."), (2, "base")]);
    }

    #[test]
    fn test_page_resumes_after_offset() {
        let dir = FileAttributes::DIRECTORY;
        let entries = directory_entries(
            1,
            true,
            vec![dir_info("a", 1, dir), dir_info("b", 2, dir)],
        );

        let all: Vec<(i64, String)> = page(entries.clone(), 0).map(|(n, e)| (n, e.name)).collect();
        assert_eq!(
            all,
            vec![
                (1, ".".to_string()),
                (2, "..".to_string()),
                (3, "a".to_string()),
                (4, "b".to_string()),
            ]
        );

        let rest: Vec<(i64, String)> = page(entries.clone(), 3).map(|(n, e)| (n, e.name)).collect();
        assert_eq!(rest, vec![(4, "b".to_string())]);
        assert_eq!(page(entries, 4).count(), 0);
    }

    #[test]
    fn test_read_count() {
        assert_eq!(read_count(Ok(12)), Ok(12));
        assert_eq!(read_count(Err(FsStatus::EndOfFile)), Ok(0));
        assert_eq!(
            read_count(Err(FsStatus::DeviceNotReady)),
            Err(FsStatus::DeviceNotReady.errno())
        );
        assert_eq!(
            read_count(Err(FsStatus::FileIsADirectory)),
            Err(libc::EISDIR)
        );
    }

    #[test]
    fn test_missing_device() {
        let host = FuseHost {
            device: PathBuf::from("/nonexistent/fuse"),
            allow_other: false,
        };
        assert_eq!(host.load(), Err(HostStatus::DLL_NOT_FOUND));
    }

    #[test]
    fn test_default_mount_point() {
        let host = FuseHost::new();
        let params = VolumeParams::new("Game Depot");
        let handler: Arc<dyn RequestHandler> = Arc::new(NullHandler);
        let mut volume = host.create_volume(&params, handler).unwrap();

        volume.set_mount_point(None).unwrap();
        let mount_point = volume.mount_point().unwrap();
        assert!(Path::new(&mount_point).is_dir());
        assert!(volume.set_mount_point(Some("/nonexistent/mount")).is_err());
    }

    struct NullHandler;

    impl RequestHandler for NullHandler {
        fn volume_info(&self) -> Result<crate::VolumeInfo, FsStatus> {
            Err(FsStatus::DeviceNotReady)
        }
        fn open(&self, _path: &str) -> Result<FileContext, FsStatus> {
            Err(FsStatus::DeviceNotReady)
        }
        fn open_node(&self, _node: NodeId) -> Result<FileContext, FsStatus> {
            Err(FsStatus::DeviceNotReady)
        }
        fn lookup_child(
            &self,
            _dir: NodeId,
            _name: &str,
        ) -> Result<depotfs_index::EntryInfo, FsStatus> {
            Err(FsStatus::DeviceNotReady)
        }
        fn file_info(&self, _ctx: &FileContext) -> Result<FileInfo, FsStatus> {
            Err(FsStatus::DeviceNotReady)
        }
        fn read(&self, _ctx: &FileContext, _offset: u64, _buf: &mut [u8]) -> Result<usize, FsStatus> {
            Err(FsStatus::DeviceNotReady)
        }
        fn read_directory(
            &self,
            _ctx: &FileContext,
            _pattern: Option<&str>,
            _marker: Option<&str>,
        ) -> Result<Vec<crate::DirInfo>, FsStatus> {
            Err(FsStatus::DeviceNotReady)
        }
        fn stream_info(&self, _ctx: &FileContext) -> Result<Vec<crate::StreamInfo>, FsStatus> {
            Err(FsStatus::DeviceNotReady)
        }
        fn close(&self, _ctx: FileContext) {}
    }
}
