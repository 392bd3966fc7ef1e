//! Fixed volume parameters
//!
//! Every depotfs volume is mounted with the same parameter set: a read-only,
//! case-insensitive, case-preserving Unicode volume with one-byte sectors.
//! Only the label and the creation time vary between sessions.

use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Filesystem name reported to the host
pub const FILESYSTEM_NAME: &str = "DEPOTFS";

/// Default volume label
pub const DEFAULT_VOLUME_LABEL: &str = "Game Depot";

/// Maximum volume label length in UTF-16 code units
pub const MAX_VOLUME_LABEL_LEN: usize = 32;

/// File information cache timeout, in host units (milliseconds)
pub const FILE_INFO_TIMEOUT: u32 = 1000;

/// 100 ns intervals between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

/// Convert a `SystemTime` to 100 ns intervals since 1601-01-01
pub fn to_file_time(time: SystemTime) -> u64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => {
            let intervals = since.as_nanos() / 100;
            FILETIME_UNIX_EPOCH.saturating_add(u64::try_from(intervals).unwrap_or(u64::MAX))
        }
        Err(before) => {
            let intervals = before.duration().as_nanos() / 100;
            FILETIME_UNIX_EPOCH.saturating_sub(u64::try_from(intervals).unwrap_or(u64::MAX))
        }
    }
}

/// Convert 100 ns intervals since 1601-01-01 back to a `SystemTime`
pub fn from_file_time(file_time: u64) -> SystemTime {
    if file_time >= FILETIME_UNIX_EPOCH {
        UNIX_EPOCH + Duration::from_nanos((file_time - FILETIME_UNIX_EPOCH).saturating_mul(100))
    } else {
        UNIX_EPOCH - Duration::from_nanos((FILETIME_UNIX_EPOCH - file_time).saturating_mul(100))
    }
}

/// Volume parameters handed to the host framework when the volume is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct VolumeParams {
    /// Sector size in bytes
    pub sector_size: u16,
    /// Sectors per allocation unit
    pub sectors_per_allocation_unit: u16,
    /// Longest path component accepted
    pub max_component_length: u16,
    /// Volume creation time, 100 ns intervals since 1601-01-01
    pub volume_creation_time: u64,
    /// Volume serial number
    pub volume_serial_number: u32,
    /// File information cache timeout
    pub file_info_timeout: u32,
    /// Case-sensitive name lookup
    pub case_sensitive_search: bool,
    /// Names keep the case they were created with
    pub case_preserved_names: bool,
    /// Names are Unicode
    pub unicode_on_disk: bool,
    /// Persistent ACL support advertised
    pub persistent_acls: bool,
    /// Reparse points supported
    pub reparse_points: bool,
    /// Access checks are performed on reparse points
    pub reparse_points_access_check: bool,
    /// Named streams supported
    pub named_streams: bool,
    /// Volume rejects all modification
    pub read_only_volume: bool,
    /// Cleanup is delivered only for modified files
    pub post_cleanup_when_modified_only: bool,
    /// Directory query patterns are passed to the request handler
    pub pass_query_directory_pattern: bool,
    /// Cached data is flushed and purged on cleanup
    pub flush_and_purge_on_cleanup: bool,
    /// Filesystem name
    pub file_system_name: String,
    /// Volume label
    pub volume_label: String,
}

impl VolumeParams {
    /// Build the fixed parameter set with the given label, created now
    pub fn new(volume_label: impl Into<String>) -> Self {
        Self::created_at(volume_label, SystemTime::now())
    }

    /// Build the fixed parameter set with an explicit creation time
    pub fn created_at(volume_label: impl Into<String>, created: SystemTime) -> Self {
        Self {
            sector_size: 1,
            sectors_per_allocation_unit: 1,
            max_component_length: 255,
            volume_creation_time: to_file_time(created),
            volume_serial_number: 0,
            file_info_timeout: FILE_INFO_TIMEOUT,
            case_sensitive_search: false,
            case_preserved_names: true,
            unicode_on_disk: true,
            persistent_acls: true,
            reparse_points: true,
            reparse_points_access_check: true,
            named_streams: true,
            read_only_volume: true,
            post_cleanup_when_modified_only: true,
            pass_query_directory_pattern: true,
            flush_and_purge_on_cleanup: true,
            file_system_name: FILESYSTEM_NAME.to_string(),
            volume_label: volume_label.into(),
        }
    }

    /// Volume creation time as a `SystemTime`
    pub fn creation_time(&self) -> SystemTime {
        from_file_time(self.volume_creation_time)
    }

    /// Allocation unit size in bytes
    pub const fn allocation_unit(&self) -> u64 {
        self.sector_size as u64 * self.sectors_per_allocation_unit as u64
    }
}
