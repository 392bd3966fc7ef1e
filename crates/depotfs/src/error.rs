//! Error types for filesystem session operations

use crate::host::HostStatus;
use crate::session::SessionState;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Game executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("Content directory missing: {}", .0.display())]
    ContentDirMissing(PathBuf),

    #[error("Codec {0} is not available")]
    CodecUnavailable(String),

    #[error("Host framework {name} could not be loaded: {status}")]
    HostUnavailable { name: String, status: HostStatus },

    #[error("Session is already initialized")]
    AlreadyInitialized,

    #[error("Session is not initialized")]
    NotInitialized,

    #[error("Session is already started")]
    AlreadyStarted,

    #[error("Operation {operation} is not valid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Host operation {operation} failed with status {status}")]
    Host {
        operation: &'static str,
        status: HostStatus,
    },
}

impl SessionError {
    /// Whether the error comes from a missing prerequisite in the environment
    pub const fn is_environment(&self) -> bool {
        matches!(
            self,
            Self::ExecutableNotFound(_)
                | Self::ContentDirMissing(_)
                | Self::CodecUnavailable(_)
                | Self::HostUnavailable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
