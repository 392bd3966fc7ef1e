//! Session configuration

use crate::volume::{DEFAULT_VOLUME_LABEL, MAX_VOLUME_LABEL_LEN};
use crate::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default language tag for language-pack archives
pub const DEFAULT_LANGUAGE: &str = "en";

/// Configuration for a filesystem session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Game executable used to derive the installation root.
    ///
    /// When unset, the running executable is used.
    pub executable_path: Option<PathBuf>,

    /// Language tag; `lang_<tag>*` archives are loaded, other language
    /// packs are skipped
    pub language: String,

    /// Mount point requested from the host; the host chooses when unset
    pub mount_point: Option<String>,

    /// Volume label
    pub volume_label: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            executable_path: None,
            language: DEFAULT_LANGUAGE.to_string(),
            mount_point: None,
            volume_label: DEFAULT_VOLUME_LABEL.to_string(),
        }
    }
}

impl SessionConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            SessionError::Config(format!("Failed to parse {}: {e}", path.display()))
        })
    }

    /// Use an explicit game executable path
    #[must_use]
    pub fn with_executable_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.executable_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the language tag
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Request a mount point
    #[must_use]
    pub fn with_mount_point(mut self, mount_point: impl Into<String>) -> Self {
        self.mount_point = Some(mount_point.into());
        self
    }

    /// Set the volume label
    #[must_use]
    pub fn with_volume_label(mut self, label: impl Into<String>) -> Self {
        self.volume_label = label.into();
        self
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Config` if:
    /// - the language tag is empty or contains characters other than ASCII
    ///   letters, digits and `-`
    /// - the volume label is empty or longer than 32 UTF-16 code units
    pub fn validate(&self) -> Result<()> {
        if self.language.is_empty()
            || !self
                .language
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(SessionError::Config(format!(
                "invalid language tag {:?}",
                self.language
            )));
        }

        let label_len = self.volume_label.encode_utf16().count();
        if label_len == 0 || label_len > MAX_VOLUME_LABEL_LEN {
            return Err(SessionError::Config(format!(
                "volume label must be 1-{MAX_VOLUME_LABEL_LEN} characters, got {label_len}"
            )));
        }

        Ok(())
    }
}
