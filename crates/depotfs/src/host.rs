//! Host filesystem framework contract
//!
//! The host framework owns the request dispatcher. A session asks it to
//! create a volume bound to a [`RequestHandler`], assigns a mount point and
//! then engages or disengages the dispatcher. Dropping the boxed
//! [`VolumeHandle`] releases the volume.

use crate::request::RequestHandler;
use crate::volume::VolumeParams;
use std::fmt;
use std::sync::Arc;
use tracing::error;

/// Raw NTSTATUS-style status code reported by a host framework
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostStatus(pub i32);

impl HostStatus {
    /// Operation succeeded
    pub const SUCCESS: Self = Self(0);
    /// Requested object does not exist
    #[allow(clippy::cast_possible_wrap)]
    pub const NOT_FOUND: Self = Self(0xC000_0225_u32 as i32);
    /// Host framework component not installed or not loadable
    #[allow(clippy::cast_possible_wrap)]
    pub const DLL_NOT_FOUND: Self = Self(0xC000_0135_u32 as i32);
    /// Mount point is already in use
    #[allow(clippy::cast_possible_wrap)]
    pub const OBJECT_NAME_COLLISION: Self = Self(0xC000_0035_u32 as i32);
    /// Generic failure
    #[allow(clippy::cast_possible_wrap)]
    pub const UNSUCCESSFUL: Self = Self(0xC000_0001_u32 as i32);

    /// Non-negative codes are success
    pub const fn is_success(self) -> bool {
        self.0 >= 0
    }

    /// Convert to a `Result`, keeping the status as the error
    ///
    /// # Errors
    ///
    /// Returns `self` when the status is a failure code
    pub const fn ok(self) -> Result<(), Self> {
        if self.is_success() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

/// Host filesystem framework
pub trait HostFramework: Send + Sync {
    /// Framework name for diagnostics
    fn name(&self) -> &str;

    /// Load the framework into the process
    ///
    /// # Errors
    ///
    /// Returns the host status when the framework is not installed
    fn load(&self) -> Result<(), HostStatus>;

    /// Create a volume that delivers requests to `handler`
    ///
    /// # Errors
    ///
    /// Returns the host status when the volume cannot be created
    fn create_volume(
        &self,
        params: &VolumeParams,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Box<dyn VolumeHandle>, HostStatus>;
}

/// Volume created by a host framework
///
/// Dropping the handle releases the volume. The dispatcher must be stopped
/// before the handle is dropped.
pub trait VolumeHandle: Send {
    /// Assign a mount point, or let the host choose one with `None`
    ///
    /// # Errors
    ///
    /// Returns the host status when the mount point cannot be assigned
    fn set_mount_point(&mut self, mount_point: Option<&str>) -> Result<(), HostStatus>;

    /// Mount point currently assigned
    fn mount_point(&self) -> Option<String>;

    /// Set the host's debug log mask
    fn set_debug_log(&mut self, level: u32);

    /// Start delivering requests
    ///
    /// # Errors
    ///
    /// Returns the host status when the dispatcher fails to start
    fn start_dispatcher(&mut self) -> Result<(), HostStatus>;

    /// Stop delivering requests
    fn stop_dispatcher(&mut self);
}

/// User-facing diagnostic surface for unrecoverable setup failures
pub trait Notifier: Send + Sync {
    /// Present a diagnostic to the user
    fn notify(&self, title: &str, message: &str);
}

/// Notifier that writes diagnostics to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        error!("{}: {}", title, message);
    }
}
