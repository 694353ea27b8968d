//! Extension manager settings.
//!
//! Settings are stored as JSON by the host application and passed to
//! [`crate::ExtensionManager::new`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExtensionError, Result};
use crate::storage::RegistryEntry;

// =============================================================================
// Defaults
// =============================================================================

/// Host version used when none is configured.
pub const DEFAULT_HOST_VERSION: &str = "v0.1.0";

/// Request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default location of the extension directory.
///
/// `<data dir>/extension-manager/extensions`, or `None` on platforms without a
/// data directory.
pub fn default_extension_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("extension-manager").join("extensions"))
}

fn default_manual_file_extensions() -> Vec<String> {
    vec!["jar".to_string()]
}

// =============================================================================
// Manager Config
// =============================================================================

/// Configuration of an [`crate::ExtensionManager`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Directory holding installed extensions. `None` disables everything
    /// that touches the disk until a directory is set.
    pub extension_dir: Option<PathBuf>,

    /// Version of the running host application, e.g. "v0.5.1".
    pub host_version: String,

    /// Catalogs used when no registry has been saved yet.
    pub default_catalogs: Vec<RegistryEntry>,

    /// File extensions (without dot) reported as manually installed when
    /// dropped into the extension directory.
    #[serde(default = "default_manual_file_extensions")]
    pub manual_file_extensions: Vec<String>,

    /// Timeout for each HTTP request.
    pub request_timeout_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            extension_dir: default_extension_dir(),
            host_version: DEFAULT_HOST_VERSION.to_string(),
            default_catalogs: Vec::new(),
            manual_file_extensions: default_manual_file_extensions(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ManagerConfig {
    /// Load settings from a JSON file, using defaults for missing values.
    ///
    /// A missing or unparsable file yields the defaults.
    pub fn load(path: &Path) -> Self {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "No settings file, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str::<ManagerConfig>(&json) {
            Ok(mut loaded) => {
                loaded.validate();
                loaded
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse settings, using defaults");
                Self::default()
            }
        }
    }

    /// Save settings as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ExtensionError::InvalidArgument(e.to_string()))?;
        fs::write(path, json).map_err(|e| ExtensionError::io(path, e))
    }

    /// Clamp values to usable ranges.
    pub fn validate(&mut self) {
        self.request_timeout_secs = self.request_timeout_secs.clamp(1, 300);

        self.manual_file_extensions = self
            .manual_file_extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();

        if self.host_version.trim().is_empty() {
            self.host_version = DEFAULT_HOST_VERSION.to_string();
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Whether `path` looks like a manually installed extension file.
    pub fn is_manual_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.manual_file_extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
    }
}
