//! Read-only filesystem volume over a game's packed archives
//!
//! A [`Session`] locates the game's content directory, loads its archives
//! into a [`depotfs_index::ContentIndex`] and mounts the result through a
//! [`HostFramework`]. Host dispatcher threads then call the session's
//! [`RequestHandler`], which answers lookups, attribute queries, directory
//! listings and reads against the index. Every mutating request is denied.
//!
//! Path components are interned through [`depotfs_name`], so comparisons in
//! the index are hash comparisons.
//!
//! With the `fuse` feature on Unix, `fuse::FuseHost` mounts volumes through
//! the kernel FUSE driver.

pub mod config;
pub mod discovery;
pub mod error;
pub mod host;
pub mod request;
pub mod session;
pub mod volume;

#[cfg(all(unix, feature = "fuse"))]
pub mod fuse;

pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use host::{HostFramework, HostStatus, LogNotifier, Notifier, VolumeHandle};
pub use request::{
    DirInfo, FileAttributes, FileContext, FileInfo, FsStatus, Mutation, RequestHandler,
    StreamInfo, VolumeInfo, VolumeRequests,
};
pub use session::{LoadReport, Session, SessionState};
pub use volume::{FILESYSTEM_NAME, VolumeParams};

// Re-export the collaborator crates
pub use depotfs_index;
pub use depotfs_name;
