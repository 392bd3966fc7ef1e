//! Filesystem session lifecycle
//!
//! A [`Session`] moves through
//! `Unconfigured -> Initialized -> Populated -> Running -> Stopped`.
//! `init` creates the host volume, `load_archives` fills the content index,
//! `start` and `shutdown` engage and disengage the host dispatcher, and
//! `reset` (also run on drop) releases the volume.

use crate::config::SessionConfig;
use crate::discovery::{content_dir, game_root_from_executable, scan_archives};
use crate::host::{HostFramework, LogNotifier, Notifier, VolumeHandle};
use crate::request::{RequestHandler, SessionShared, VolumeRequests};
use crate::volume::VolumeParams;
use crate::{Result, SessionError};
use depotfs_index::{Codec, ContentIndex, LoadedArchive};
use parking_lot::RwLockReadGuard;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Title used for user-facing diagnostics
const NOTIFY_TITLE: &str = "depotfs";

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No volume handle
    Unconfigured,
    /// Volume created, index not yet populated
    Initialized,
    /// Archives loaded
    Populated,
    /// Dispatcher delivering requests
    Running,
    /// Dispatcher stopped, volume still held
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unconfigured => "unconfigured",
            Self::Initialized => "initialized",
            Self::Populated => "populated",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Outcome of `load_archives`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Archives loaded, in load order
    pub loaded: Vec<LoadedArchive>,
    /// Archives that failed to load, with the error message
    pub failed: Vec<(PathBuf, String)>,
    /// Language packs skipped for another language
    pub skipped_language: Vec<PathBuf>,
    /// Time spent scanning and loading
    pub elapsed: Duration,
}

/// Read-only volume over a game's archives
pub struct Session<I: ContentIndex + 'static> {
    config: SessionConfig,
    host: Arc<dyn HostFramework>,
    codec: Arc<dyn Codec>,
    notifier: Arc<dyn Notifier>,
    shared: Arc<SessionShared<I>>,
    handler: Arc<VolumeRequests<I>>,
    handle: Option<Box<dyn VolumeHandle>>,
    state: SessionState,
    mount_point: Option<String>,
    content_path: Option<PathBuf>,
    populated: bool,
}

impl<I: ContentIndex + 'static> Session<I> {
    /// Create an unconfigured session
    ///
    /// The volume creation time is taken now.
    pub fn new(
        config: SessionConfig,
        index: I,
        host: Arc<dyn HostFramework>,
        codec: Arc<dyn Codec>,
    ) -> Self {
        let params = VolumeParams::new(config.volume_label.clone());
        let shared = Arc::new(SessionShared::new(index, params));
        let handler = Arc::new(VolumeRequests::new(Arc::clone(&shared)));

        Self {
            config,
            host,
            codec,
            notifier: Arc::new(LogNotifier),
            shared,
            handler,
            handle: None,
            state: SessionState::Unconfigured,
            mount_point: None,
            content_path: None,
            populated: false,
        }
    }

    /// Use a custom diagnostic surface
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Locate the game content and create the host volume
    ///
    /// Missing prerequisites are reported through the notifier and leave the
    /// session unconfigured. The index outlives `reset`, so a session whose
    /// archives were already loaded comes back `Populated`.
    ///
    /// # Errors
    ///
    /// - `AlreadyInitialized` if a volume is already held
    /// - `Config` if the configuration is invalid
    /// - `ExecutableNotFound`, `ContentDirMissing`, `CodecUnavailable` or
    ///   `HostUnavailable` for a missing prerequisite
    /// - `Host` if the host rejects volume creation or the mount point
    pub fn init(&mut self, log_level: u32) -> Result<()> {
        if self.handle.is_some() {
            return Err(SessionError::AlreadyInitialized);
        }
        self.config.validate()?;

        let content = self.locate_content().map_err(|e| self.report(e))?;

        if !self.codec.is_available() {
            return Err(self.report(SessionError::CodecUnavailable(
                self.codec.name().to_string(),
            )));
        }

        self.host.load().map_err(|status| {
            self.report(SessionError::HostUnavailable {
                name: self.host.name().to_string(),
                status,
            })
        })?;

        let handler: Arc<dyn RequestHandler> = self.handler.clone();
        let mut handle = self
            .host
            .create_volume(&self.shared.params, handler)
            .map_err(|status| host_failure("create volume", status))?;

        // On failure the handle is dropped here, releasing the volume
        handle
            .set_mount_point(self.config.mount_point.as_deref())
            .map_err(|status| host_failure("set mount point", status))?;
        handle.set_debug_log(log_level);

        self.mount_point = handle.mount_point();
        info!(
            "Initialized {} volume at {} over {}",
            self.host.name(),
            self.mount_point.as_deref().unwrap_or("<unassigned>"),
            content.display()
        );

        self.content_path = Some(content);
        self.handle = Some(handle);
        self.state = if self.populated {
            SessionState::Populated
        } else {
            SessionState::Initialized
        };
        Ok(())
    }

    /// Load every admitted archive of the content directory into the index
    ///
    /// Loading is best-effort: an archive that fails to load is logged and
    /// recorded in the report, and the remaining archives are still loaded.
    ///
    /// # Errors
    ///
    /// - `NotInitialized` before a successful `init`
    /// - `InvalidState` once archives were loaded or the volume started
    /// - `Io` if the content directory cannot be read
    pub fn load_archives(&mut self) -> Result<LoadReport> {
        match self.state {
            SessionState::Initialized => {}
            SessionState::Unconfigured => return Err(SessionError::NotInitialized),
            state => {
                return Err(SessionError::InvalidState {
                    operation: "load_archives",
                    state,
                });
            }
        }
        let content = self
            .content_path
            .clone()
            .ok_or(SessionError::NotInitialized)?;

        let started = Instant::now();
        let scan = scan_archives(&content, &self.config.language)?;
        let mut report = LoadReport {
            skipped_language: scan.skipped_language,
            ..LoadReport::default()
        };

        {
            let mut index = self.shared.index.write();
            for path in &scan.admitted {
                match index.load(path) {
                    Ok(loaded) => report.loaded.push(loaded),
                    Err(e) => {
                        warn!("Failed to load archive {}: {}", path.display(), e);
                        report.failed.push((path.clone(), e.to_string()));
                    }
                }
            }
        }

        report.elapsed = started.elapsed();
        info!(
            "Loaded {} archives ({} failed, {} language packs skipped) in {:?}",
            report.loaded.len(),
            report.failed.len(),
            report.skipped_language.len(),
            report.elapsed
        );

        self.populated = true;
        self.state = SessionState::Populated;
        Ok(report)
    }

    /// Start delivering filesystem requests
    ///
    /// # Errors
    ///
    /// - `NotInitialized` before a successful `init`
    /// - `AlreadyStarted` if the dispatcher is running
    /// - `Host` if the host fails to start the dispatcher
    pub fn start(&mut self) -> Result<()> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(SessionError::NotInitialized);
        };
        if self.state == SessionState::Running {
            return Err(SessionError::AlreadyStarted);
        }

        self.shared.accepting.store(true, Ordering::Release);
        if let Err(status) = handle.start_dispatcher() {
            self.shared.accepting.store(false, Ordering::Release);
            return Err(host_failure("start dispatcher", status));
        }

        self.state = SessionState::Running;
        info!(
            "Volume {} started",
            self.mount_point.as_deref().unwrap_or("<unassigned>")
        );
        Ok(())
    }

    /// Stop delivering filesystem requests
    ///
    /// Does nothing unless the volume is running.
    pub fn shutdown(&mut self) {
        if self.state != SessionState::Running {
            return;
        }

        self.shared.accepting.store(false, Ordering::Release);
        if let Some(handle) = self.handle.as_mut() {
            handle.stop_dispatcher();
        }
        self.state = SessionState::Stopped;
        info!("Volume stopped");
    }

    /// Shut down and release the volume, returning to `Unconfigured`
    ///
    /// The content index is kept. Safe to call repeatedly.
    pub fn reset(&mut self) {
        self.shutdown();
        if let Some(handle) = self.handle.take() {
            drop(handle);
            debug!("Released volume handle");
        }
        self.mount_point = None;
        self.content_path = None;
        self.state = SessionState::Unconfigured;
    }

    /// Aggregate decoded size of all loaded entries
    pub fn total_size(&self) -> u64 {
        self.shared.index.read().total_size()
    }

    /// Whether the dispatcher is running
    pub fn is_started(&self) -> bool {
        self.state == SessionState::Running
    }

    /// Current lifecycle state
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Mount point assigned by the host
    pub fn mount_point(&self) -> Option<&str> {
        self.mount_point.as_deref()
    }

    /// Content directory found during `init`
    pub fn content_path(&self) -> Option<&Path> {
        self.content_path.as_deref()
    }

    /// Fixed volume parameters
    pub fn volume_params(&self) -> &VolumeParams {
        &self.shared.params
    }

    /// Session configuration
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Read access to the content index
    pub fn index(&self) -> RwLockReadGuard<'_, I> {
        self.shared.index.read()
    }

    /// Request handler bound to the volume
    pub fn requests(&self) -> Arc<dyn RequestHandler> {
        self.handler.clone()
    }

    fn locate_content(&self) -> Result<PathBuf> {
        let executable = match &self.config.executable_path {
            Some(path) => path.clone(),
            None => std::env::current_exe()
                .map_err(|e| SessionError::ExecutableNotFound(e.to_string()))?,
        };

        let root = game_root_from_executable(&executable).ok_or_else(|| {
            SessionError::ExecutableNotFound(format!(
                "{} has no installation root",
                executable.display()
            ))
        })?;

        let content = content_dir(&root);
        if !content.is_dir() {
            return Err(SessionError::ContentDirMissing(content));
        }
        Ok(content)
    }

    fn report(&self, err: SessionError) -> SessionError {
        self.notifier.notify(NOTIFY_TITLE, &err.to_string());
        err
    }
}

fn host_failure(operation: &'static str, status: crate::HostStatus) -> SessionError {
    error!("Host {} failed: {}", operation, status);
    SessionError::Host { operation, status }
}

impl<I: ContentIndex + 'static> Drop for Session<I> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<I: ContentIndex + 'static> fmt::Debug for Session<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("host", &self.host.name())
            .field("codec", &self.codec.name())
            .field("mount_point", &self.mount_point)
            .field("content_path", &self.content_path)
            .finish_non_exhaustive()
    }
}
