//! On-disk layout of installed extensions.
//!
//! Everything lives under a user-chosen extension directory:
//!
//! ```text
//! <root>/catalogs/registry.json
//! <root>/catalogs/<catalog>/<extension>/<release>/main-artifact/
//!                                                 required-deps/
//!                                                 optional-deps/
//!                                                 docs/
//! <root>/<files dropped in by hand>
//! ```
//!
//! Catalog and extension names are display names chosen by catalog authors,
//! so they are sanitized before being used as path segments.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};

use super::registry::{self, RegistryEntry};
use crate::error::{ExtensionError, Result};
use crate::version::Version;

/// Name of the directory holding catalog installs and the registry.
pub const CATALOGS_DIR: &str = "catalogs";

/// File name of the persisted registry, inside [`CATALOGS_DIR`].
pub const REGISTRY_FILE: &str = "registry.json";

/// Scratch file written while the registry is saved.
const REGISTRY_TMP_FILE: &str = "registry.json.tmp";

/// Characters that are not allowed in a path segment on some platform.
const INVALID_NAME_CHARS: &[char] = &['\\', '/', ':', '"', '*', '?', '<', '>', '|', '\n', '\r'];

/// Turns a display name into a single path segment.
///
/// Characters that cannot appear in file names are stripped. Names that would
/// then resolve to the enclosing directory (`""`, `.`, `..`) or collide with the
/// registry file get a `_` prefix. Applying it twice changes nothing.
pub fn sanitize_name(name: &str) -> String {
    let stripped: String = name
        .chars()
        .filter(|c| !INVALID_NAME_CHARS.contains(c))
        .collect();
    let reserved = stripped.chars().all(|c| c == '.')
        || stripped.eq_ignore_ascii_case(REGISTRY_FILE)
        || stripped.eq_ignore_ascii_case(REGISTRY_TMP_FILE);
    if reserved {
        format!("_{stripped}")
    } else {
        stripped
    }
}

// ============================================================================
// Artifact Kinds
// ============================================================================

/// The kind of file a release download provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    MainArtifact,
    RequiredDependency,
    OptionalDependency,
    Javadoc,
}

impl ArtifactKind {
    pub fn all() -> &'static [ArtifactKind] {
        &[
            Self::MainArtifact,
            Self::RequiredDependency,
            Self::OptionalDependency,
            Self::Javadoc,
        ]
    }

    /// Folder name inside a release directory.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::MainArtifact => "main-artifact",
            Self::RequiredDependency => "required-deps",
            Self::OptionalDependency => "optional-deps",
            Self::Javadoc => "docs",
        }
    }
}

// ============================================================================
// Installed Extension
// ============================================================================

/// What is installed for one extension, as read from the directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledExtension {
    pub release_name: String,
    pub optional_dependencies_installed: bool,
}

impl InstalledExtension {
    pub fn new(release_name: impl Into<String>, optional_dependencies_installed: bool) -> Self {
        Self {
            release_name: release_name.into(),
            optional_dependencies_installed,
        }
    }
}

// ============================================================================
// Extension Layout
// ============================================================================

/// Maps catalogs, extensions and releases to paths under an extension
/// directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionLayout {
    root: PathBuf,
}

impl ExtensionLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path: `<root>/catalogs/`
    pub fn catalogs_dir(&self) -> PathBuf {
        self.root.join(CATALOGS_DIR)
    }

    /// Path: `<root>/catalogs/registry.json`
    pub fn registry_path(&self) -> PathBuf {
        self.catalogs_dir().join(REGISTRY_FILE)
    }

    pub fn catalog_dir(&self, catalog: &str) -> PathBuf {
        self.catalogs_dir().join(sanitize_name(catalog))
    }

    pub fn extension_dir(&self, catalog: &str, extension: &str) -> PathBuf {
        self.catalog_dir(catalog).join(sanitize_name(extension))
    }

    pub fn release_dir(&self, catalog: &str, extension: &str, release: &str) -> PathBuf {
        self.extension_dir(catalog, extension)
            .join(sanitize_name(release))
    }

    /// Fails unless the root exists and is a directory.
    pub fn check_root(&self) -> Result<()> {
        match fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(ExtensionError::RootUnavailable {
                path: Some(self.root.clone()),
                reason: "not a directory".to_string(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ExtensionError::RootUnavailable {
                path: Some(self.root.clone()),
                reason: "directory does not exist".to_string(),
            }),
            Err(e) => Err(ExtensionError::io(&self.root, e)),
        }
    }

    /// Creates `<root>/catalogs/` if needed.
    pub fn ensure_catalogs_dir(&self) -> Result<PathBuf> {
        self.check_root()?;
        let dir = self.catalogs_dir();
        ensure_dir(&dir)?;
        Ok(dir)
    }

    /// Returns the folder for one kind of artifact of a release, creating every
    /// directory on the way. A regular file standing where a directory should
    /// be is replaced.
    pub fn path_for(
        &self,
        catalog: &str,
        extension: &str,
        release: &str,
        kind: ArtifactKind,
    ) -> Result<PathBuf> {
        let mut dir = self.ensure_catalogs_dir()?;
        for segment in [
            sanitize_name(catalog),
            sanitize_name(extension),
            sanitize_name(release),
            kind.dir_name().to_string(),
        ] {
            dir.push(segment);
            ensure_dir(&dir)?;
        }
        Ok(dir)
    }

    /// Reads which release of an extension is installed.
    ///
    /// A release counts as installed when its `main-artifact` folder is not
    /// empty. If several releases qualify, the newest one is reported.
    pub fn installed_release(
        &self,
        catalog: &str,
        extension: &str,
    ) -> Result<Option<InstalledExtension>> {
        self.check_root()?;
        let extension_dir = self.extension_dir(catalog, extension);
        let entries = match fs::read_dir(&extension_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ExtensionError::io(&extension_dir, e)),
        };

        let mut best: Option<(Version, InstalledExtension)> = None;
        for entry in entries {
            let entry = entry.map_err(|e| ExtensionError::io(&extension_dir, e))?;
            let release_dir = entry.path();
            if !release_dir.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Ok(version) = Version::parse(&name) else {
                debug!("Ignoring non-release directory {}", release_dir.display());
                continue;
            };
            if !dir_has_entries(&release_dir.join(ArtifactKind::MainArtifact.dir_name()))? {
                continue;
            }

            let optional = dir_has_entries(
                &release_dir.join(ArtifactKind::OptionalDependency.dir_name()),
            )?;
            if best.as_ref().map_or(true, |(v, _)| version > *v) {
                best = Some((version, InstalledExtension::new(name, optional)));
            }
        }

        Ok(best.map(|(_, installed)| installed))
    }

    /// Deletes every file of one extension.
    pub fn delete_extension(&self, catalog: &str, extension: &str) -> Result<()> {
        self.check_root()?;
        self.remove_managed(&self.extension_dir(catalog, extension))
    }

    /// Deletes everything installed from one catalog.
    pub fn delete_catalog(&self, catalog: &str) -> Result<()> {
        self.check_root()?;
        self.remove_managed(&self.catalog_dir(catalog))
    }

    pub fn load_registry(&self) -> Result<Option<Vec<RegistryEntry>>> {
        self.check_root()?;
        registry::load_registry_from(&self.registry_path())
    }

    pub fn save_registry(&self, entries: &[RegistryEntry]) -> Result<()> {
        self.ensure_catalogs_dir()?;
        registry::save_registry_to(entries, &self.registry_path())
    }

    /// Deletes a tree that must sit strictly below `<root>/catalogs/`.
    fn remove_managed(&self, path: &Path) -> Result<()> {
        let catalogs_dir = self.catalogs_dir();
        let below = path.strip_prefix(&catalogs_dir).is_ok_and(|rest| {
            rest.components().next().is_some()
                && rest.components().all(|c| matches!(c, Component::Normal(_)))
        });
        if !below || path == self.registry_path() {
            return Err(ExtensionError::InvalidArgument(format!(
                "refusing to delete {} outside {}",
                path.display(),
                catalogs_dir.display()
            )));
        }
        remove_tree(path)
    }
}

/// Creates `dir`, first removing a regular file of the same name.
fn ensure_dir(dir: &Path) -> Result<()> {
    match fs::symlink_metadata(dir) {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => {
            info!("Replacing file {} with a directory", dir.display());
            fs::remove_file(dir).map_err(|e| ExtensionError::io(dir, e))?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(ExtensionError::io(dir, e)),
    }
    fs::create_dir(dir).map_err(|e| ExtensionError::io(dir, e))
}

fn dir_has_entries(dir: &Path) -> Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    let mut entries = fs::read_dir(dir).map_err(|e| ExtensionError::io(dir, e))?;
    Ok(entries.next().is_some())
}

fn remove_tree(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ExtensionError::io(path, e)),
    }
}
