//! Catalog registry persistence.
//!
//! The registry is the list of catalogs the user has configured. It lives at
//! `<root>/catalogs/registry.json` and is the source of truth for "which
//! catalogs exist"; what is installed is read from the directory tree instead.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{ExtensionError, Result};

// ============================================================================
// Registry Data Structures
// ============================================================================

/// A configured catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    /// Catalog name, unique within the registry.
    pub name: String,
    pub description: String,
    /// URL the user entered. May be a GitHub page rather than the JSON file.
    pub uri: Url,
    /// Direct URL of the catalog JSON document.
    pub raw_uri: Url,
    /// False for catalogs shipped with the application.
    pub deletable: bool,
}

/// Root structure of the registry file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub catalogs: Vec<RegistryEntry>,
}

// ============================================================================
// Registry Persistence
// ============================================================================

/// Loads the registry from `path`.
///
/// Returns `Ok(None)` when no registry has been written yet so the caller can
/// fall back to its default catalogs.
pub fn load_registry_from(path: &Path) -> Result<Option<Vec<RegistryEntry>>> {
    if !path.exists() {
        debug!("Registry not found at {}", path.display());
        return Ok(None);
    }

    let content = fs::read_to_string(path).map_err(|e| ExtensionError::io(path, e))?;
    let registry: Registry = serde_json::from_str(&content)
        .map_err(|e| ExtensionError::malformed(path.display().to_string(), e.to_string()))?;

    debug!(
        "Loaded {} catalogs from {}",
        registry.catalogs.len(),
        path.display()
    );
    Ok(Some(registry.catalogs))
}

/// Saves the registry to `path`.
///
/// The file is written next to its destination and renamed into place, so a
/// reader never observes a partially written registry.
pub fn save_registry_to(entries: &[RegistryEntry], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ExtensionError::io(parent, e))?;
    }

    let registry = Registry {
        catalogs: entries.to_vec(),
    };
    let content = serde_json::to_string_pretty(&registry)
        .map_err(|e| ExtensionError::malformed("registry", e.to_string()))?;

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, content).map_err(|e| ExtensionError::io(&tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        ExtensionError::io(path, e)
    })?;

    debug!("Registry saved to {}", path.display());
    Ok(())
}
