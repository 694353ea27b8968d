//! Extension manager coordinating catalogs, installs and on-disk state.
//!
//! The `ExtensionManager` is the main entry point. It owns the configured
//! catalogs, one observable installed-state cell per extension, and the
//! download / extract pipeline.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use url::Url;

use super::cancel::Cancellation;
use super::downloader::Downloader;
use super::extractor::{extract_archive, ArchiveFormat};
use super::state::{ExtensionKey, InstalledStates, StateCell};
use crate::catalog::{Catalog, CatalogClient, Extension, Release};
use crate::config::ManagerConfig;
use crate::error::{ExtensionError, Result};
use crate::storage::{sanitize_name, ArtifactKind, ExtensionLayout, InstalledExtension, RegistryEntry};
use crate::version::Version;
use crate::watcher::{FileWatcher, WatchEvent};

// ============================================================================
// Public Types
// ============================================================================

/// The phase an install is in, reported with the resource being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStep {
    Downloading,
    Extracting,
}

/// What to install for an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTarget {
    pub release_name: String,
    pub install_optional_deps: bool,
}

impl InstallTarget {
    pub fn new(release_name: impl Into<String>, install_optional_deps: bool) -> Self {
        Self {
            release_name: release_name.into(),
            install_optional_deps,
        }
    }
}

/// A newer compatible release of an installed extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateAvailable {
    pub catalog_name: String,
    pub extension_name: String,
    pub current_release: String,
    pub new_release: String,
}

// ============================================================================
// Extension Manager
// ============================================================================

/// Manages catalogs and extension installs.
///
/// Thread-safe; share it behind an `Arc` and spawn its futures wherever
/// convenient. Progress callbacks run on whichever task drives the future.
pub struct ExtensionManager {
    config: ManagerConfig,
    host_version: Version,
    client: CatalogClient,
    downloader: Downloader,
    layout: Arc<RwLock<Option<ExtensionLayout>>>,
    catalogs: watch::Sender<Vec<RegistryEntry>>,
    /// Serializes registry read-modify-write cycles.
    registry_lock: tokio::sync::Mutex<()>,
    states: InstalledStates,
    watcher: FileWatcher,
}

impl ExtensionManager {
    /// Creates a manager.
    ///
    /// Loads the catalog registry from the extension directory, falling back
    /// to `config.default_catalogs`, and starts watching the directory for
    /// manually installed files.
    pub fn new(config: ManagerConfig) -> Result<Self> {
        let host_version = Version::parse(&config.host_version).map_err(|e| {
            ExtensionError::InvalidArgument(format!(
                "host version '{}': {}",
                config.host_version, e
            ))
        })?;
        let mut config = config;
        config.validate();

        let client = CatalogClient::with_timeout(config.request_timeout())?;
        let downloader = Downloader::new(config.request_timeout())?;

        if let Some(dir) = &config.extension_dir {
            create_root(dir);
        }
        let layout = Arc::new(RwLock::new(
            config.extension_dir.clone().map(ExtensionLayout::new),
        ));

        let manual_files = config.clone();
        let skip_layout = layout.clone();
        let watcher = FileWatcher::new(
            move |path| manual_files.is_manual_file(path),
            move |dir| {
                skip_layout
                    .read()
                    .as_ref()
                    .is_some_and(|layout| dir == layout.catalogs_dir())
            },
        );

        let catalogs = load_catalogs(layout.read().as_ref(), &config.default_catalogs);
        let (catalogs, _) = watch::channel(catalogs);

        info!(
            "ExtensionManager initialized. Extension dir: {:?}, host version: {}",
            config.extension_dir, host_version
        );

        let manager = Self {
            host_version,
            client,
            downloader,
            layout,
            catalogs,
            registry_lock: tokio::sync::Mutex::new(()),
            states: InstalledStates::new(),
            watcher,
            config,
        };
        manager.watcher.set_root(manager.config.extension_dir.clone());
        Ok(manager)
    }

    /// Replaces the HTTP client used for catalogs.
    pub fn with_client(mut self, client: CatalogClient) -> Self {
        self.client = client;
        self
    }

    pub fn host_version(&self) -> &Version {
        &self.host_version
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn extension_directory(&self) -> Option<PathBuf> {
        self.layout.read().as_ref().map(|l| l.root().to_path_buf())
    }

    /// Switches to another extension directory, or to none.
    ///
    /// The registry is reloaded from the new directory, every installed-state
    /// cell is re-read, and the file watcher follows.
    pub async fn set_extension_directory(&self, dir: Option<PathBuf>) {
        let _registry = self.registry_lock.lock().await;
        info!("Extension directory set to {:?}", dir);

        if let Some(dir) = &dir {
            create_root(dir);
        }
        *self.layout.write() = dir.clone().map(ExtensionLayout::new);

        let catalogs = load_catalogs(self.current_layout().as_ref(), &self.config.default_catalogs);
        self.catalogs.send_replace(catalogs);
        self.states.refresh_all(|key| self.read_installed(key));
        self.watcher.set_root(dir);
    }

    // ========================================================================
    // Catalogs
    // ========================================================================

    /// The configured catalogs, in registry order.
    pub fn catalogs(&self) -> Vec<RegistryEntry> {
        self.catalogs.borrow().clone()
    }

    pub fn subscribe_catalogs(&self) -> watch::Receiver<Vec<RegistryEntry>> {
        self.catalogs.subscribe()
    }

    /// Adds catalogs and persists the registry.
    ///
    /// Entries whose name is already configured are skipped and their names
    /// returned. If every entry was skipped the call fails with `Conflict`.
    /// Nothing changes in memory unless the registry was written.
    pub async fn add_catalogs(&self, entries: Vec<RegistryEntry>) -> Result<Vec<String>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let _registry = self.registry_lock.lock().await;

        let current = self.catalogs();
        let mut merged = current.clone();
        let mut skipped = Vec::new();
        for entry in entries {
            if merged.iter().any(|c| c.name == entry.name) {
                warn!("Catalog '{}' is already configured, skipping", entry.name);
                skipped.push(entry.name);
            } else {
                merged.push(entry);
            }
        }

        if merged.len() == current.len() {
            return Err(ExtensionError::Conflict(format!(
                "catalogs already configured: {}",
                skipped.join(", ")
            )));
        }

        self.persist_catalogs(&merged)?;
        info!("Added {} catalogs", merged.len() - current.len());
        self.catalogs.send_replace(merged);
        Ok(skipped)
    }

    /// Resolves a user-entered catalog URL and adds the catalog it points to.
    pub async fn add_catalog_url(&self, uri: &Url) -> Result<RegistryEntry> {
        let entry = self.client.resolve_catalog_entry(uri).await?;
        self.add_catalogs(vec![entry.clone()]).await?;
        Ok(entry)
    }

    /// Removes catalogs from the registry.
    ///
    /// Catalogs that are not deletable are refused with `Conflict`. With
    /// `delete_installed`, the files installed from each removed catalog are
    /// deleted afterwards; failures there are logged and do not undo the
    /// removal. Deletion waits for running installs and removals in that
    /// catalog, and none start until its state cells are re-read.
    pub async fn remove_catalogs(
        &self,
        entries: &[RegistryEntry],
        delete_installed: bool,
    ) -> Result<()> {
        let _registry = self.registry_lock.lock().await;

        let names: HashSet<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        let current = self.catalogs();
        if let Some(locked) = current
            .iter()
            .find(|c| names.contains(c.name.as_str()) && !c.deletable)
        {
            return Err(ExtensionError::Conflict(format!(
                "catalog '{}' cannot be removed",
                locked.name
            )));
        }

        let (removed, kept): (Vec<_>, Vec<_>) = current
            .into_iter()
            .partition(|c| names.contains(c.name.as_str()));
        if removed.is_empty() {
            debug!("No configured catalog matched the removal request");
            return Ok(());
        }

        self.persist_catalogs(&kept)?;
        self.catalogs.send_replace(kept);
        info!("Removed {} catalogs", removed.len());

        if delete_installed {
            let layout = self.layout()?;
            for entry in &removed {
                let catalog_lock = self.states.catalog_lock(&entry.name);
                let _catalog = catalog_lock.write().await;

                let target = layout.clone();
                let name = entry.name.clone();
                if let Err(e) = run_blocking(move || target.delete_catalog(&name)).await {
                    warn!("Failed to delete files of catalog '{}': {}", entry.name, e);
                }
                self.states
                    .refresh_catalog(&entry.name, |key| self.read_installed(key));
            }
        }
        Ok(())
    }

    /// Downloads the current catalog document for a registry entry.
    pub async fn fetch_catalog(&self, entry: &RegistryEntry) -> Result<Catalog> {
        self.client.fetch_catalog(&entry.raw_uri).await
    }

    // ========================================================================
    // Release Selection
    // ========================================================================

    /// The newest release of `extension` that runs on this host.
    pub fn max_compatible_release<'a>(&self, extension: &'a Extension) -> Option<&'a Release> {
        extension.max_compatible_release(&self.host_version)
    }

    /// Releases of `extension` that run on this host, newest first.
    pub fn compatible_releases<'a>(&self, extension: &'a Extension) -> Vec<&'a Release> {
        extension.compatible_releases(&self.host_version)
    }

    // ========================================================================
    // Installed State
    // ========================================================================

    /// Live installed state of one extension.
    ///
    /// The first call for an extension reads it from the extension directory.
    pub fn installed_state(
        &self,
        catalog: &str,
        extension: &str,
    ) -> watch::Receiver<Option<InstalledExtension>> {
        self.state_cell(&ExtensionKey::new(catalog, extension))
            .subscribe()
    }

    /// Files dropped into the extension directory by hand.
    pub fn manually_installed_files(&self) -> Vec<PathBuf> {
        self.watcher.files()
    }

    pub fn subscribe_manual_files(&self) -> broadcast::Receiver<WatchEvent> {
        self.watcher.subscribe()
    }

    // ========================================================================
    // Installation
    // ========================================================================

    /// Installs a release of an extension, replacing whatever was installed.
    ///
    /// Existing files are deleted first. `on_progress` receives the overall
    /// completed share (0.0 to 1.0) and `on_step` the phase with the URL or
    /// file being processed. On failure the extension is reported as not
    /// installed; files downloaded so far are left in place.
    pub async fn install_or_update<P, S>(
        &self,
        catalog: &str,
        extension: &Extension,
        target: &InstallTarget,
        on_progress: P,
        on_step: S,
        cancel: &Cancellation,
    ) -> Result<()>
    where
        P: Fn(f32) + Send + Sync,
        S: Fn(InstallStep, &str) + Send + Sync,
    {
        let layout = self.layout()?;
        let catalog_lock = self.states.catalog_lock(catalog);
        let _catalog = catalog_lock.read().await;
        let cell = self.state_cell(&ExtensionKey::new(catalog, extension.name()));
        let _transition = cell.lock().await;

        info!(
            "Installing {} {} from catalog '{}'",
            extension.name(),
            target.release_name,
            catalog
        );
        let result = self
            .install_steps(
                &layout,
                &cell,
                catalog,
                extension,
                target,
                &on_progress,
                &on_step,
                cancel,
            )
            .await;

        match result {
            Ok(installed) => {
                info!(
                    "{} {} installed successfully",
                    extension.name(),
                    installed.release_name
                );
                cell.set(Some(installed));
                Ok(())
            }
            Err(e) => {
                warn!("Installing {} failed: {}", extension.name(), e);
                cell.set(None);
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn install_steps<P, S>(
        &self,
        layout: &ExtensionLayout,
        cell: &StateCell,
        catalog: &str,
        extension: &Extension,
        target: &InstallTarget,
        on_progress: &P,
        on_step: &S,
        cancel: &Cancellation,
    ) -> Result<InstalledExtension>
    where
        P: Fn(f32) + Send + Sync,
        S: Fn(InstallStep, &str) + Send + Sync,
    {
        delete_extension_files(layout, catalog, extension.name()).await?;
        cell.set(None);

        let release = extension.release(&target.release_name).ok_or_else(|| {
            ExtensionError::NotFound(format!(
                "release '{}' of extension '{}'",
                target.release_name,
                extension.name()
            ))
        })?;

        let mut downloads = vec![(ArtifactKind::MainArtifact, release.main_url())];
        downloads.extend(
            release
                .required_dependency_urls()
                .iter()
                .map(|url| (ArtifactKind::RequiredDependency, url)),
        );
        if target.install_optional_deps {
            downloads.extend(
                release
                    .optional_dependency_urls()
                    .iter()
                    .map(|url| (ArtifactKind::OptionalDependency, url)),
            );
        }
        downloads.extend(
            release
                .javadoc_urls()
                .iter()
                .map(|url| (ArtifactKind::Javadoc, url)),
        );

        let share = 1.0 / downloads.len() as f32;
        for (i, (kind, url)) in downloads.into_iter().enumerate() {
            cancel.check()?;
            let base = i as f32 * share;
            let dir = layout.path_for(catalog, extension.name(), release.name(), kind)?;
            let file_name = file_name_for(url);
            let dest = dir.join(&file_name);
            let format = ArchiveFormat::from_path(&dest);
            let download_share = if format.is_some() { share / 2.0 } else { share };

            on_step(InstallStep::Downloading, url.as_str());
            self.downloader
                .download_file(url, &dest, cancel, |p| {
                    on_progress(base + download_share * p.fraction.unwrap_or(0.0))
                })
                .await?;

            if let Some(format) = format {
                on_step(InstallStep::Extracting, &file_name);
                let extract_base = base + download_share;
                extract_in_background(&dest, &dir, format, cancel, |fraction| {
                    on_progress(extract_base + download_share * fraction)
                })
                .await?;
                tokio::fs::remove_file(&dest)
                    .await
                    .map_err(|e| ExtensionError::io(&dest, e))?;
            }

            on_progress(base + share);
        }

        Ok(InstalledExtension::new(
            release.name(),
            target.install_optional_deps && !release.optional_dependency_urls().is_empty(),
        ))
    }

    /// Deletes the files of an extension and marks it as not installed.
    ///
    /// If deletion fails the installed state is left as it was.
    pub async fn remove(&self, catalog: &str, extension: &str) -> Result<()> {
        let layout = self.layout()?;
        let catalog_lock = self.states.catalog_lock(catalog);
        let _catalog = catalog_lock.read().await;
        let cell = self.state_cell(&ExtensionKey::new(catalog, extension));
        let _transition = cell.lock().await;

        info!("Removing {} from catalog '{}'", extension, catalog);
        delete_extension_files(&layout, catalog, extension).await?;
        cell.set(None);
        Ok(())
    }

    // ========================================================================
    // Updates
    // ========================================================================

    /// Lists installed extensions that have a newer compatible release.
    ///
    /// Every configured catalog is fetched once per call.
    pub async fn available_updates(&self) -> Result<Vec<UpdateAvailable>> {
        let mut updates = Vec::new();

        for entry in self.catalogs() {
            let catalog = self.fetch_catalog(&entry).await?;
            for extension in catalog.extensions() {
                let key = ExtensionKey::new(&entry.name, extension.name());
                let Some(installed) = self.state_cell(&key).get() else {
                    continue;
                };
                let Ok(installed_version) = Version::parse(&installed.release_name) else {
                    debug!("Ignoring unparsable release {}", installed.release_name);
                    continue;
                };
                let Some(newest) = self.max_compatible_release(extension) else {
                    continue;
                };

                if *newest.version() > installed_version {
                    updates.push(UpdateAvailable {
                        catalog_name: entry.name.clone(),
                        extension_name: extension.name().to_string(),
                        current_release: installed.release_name.clone(),
                        new_release: newest.name().to_string(),
                    });
                }
            }
        }

        debug!("{} updates available", updates.len());
        Ok(updates)
    }

    // ========================================================================
    // Helper Methods
    // ========================================================================

    fn current_layout(&self) -> Option<ExtensionLayout> {
        self.layout.read().clone()
    }

    fn layout(&self) -> Result<ExtensionLayout> {
        self.current_layout()
            .ok_or_else(|| ExtensionError::RootUnavailable {
                path: None,
                reason: "no extension directory set".to_string(),
            })
    }

    fn persist_catalogs(&self, entries: &[RegistryEntry]) -> Result<()> {
        self.layout()?.save_registry(entries)
    }

    fn state_cell(&self, key: &ExtensionKey) -> Arc<StateCell> {
        self.states.cell(key, || self.read_installed(key))
    }

    fn read_installed(&self, key: &ExtensionKey) -> Option<InstalledExtension> {
        let layout = self.current_layout()?;
        match layout.installed_release(&key.catalog, &key.extension) {
            Ok(installed) => installed,
            Err(e) => {
                warn!(
                    "Failed to read installed state of {}/{}: {}",
                    key.catalog, key.extension, e
                );
                None
            }
        }
    }
}

// ============================================================================
// Free Helpers
// ============================================================================

fn create_root(dir: &Path) {
    if let Err(e) = fs::create_dir_all(dir) {
        warn!("Failed to create extension directory {}: {}", dir.display(), e);
    }
}

fn load_catalogs(
    layout: Option<&ExtensionLayout>,
    defaults: &[RegistryEntry],
) -> Vec<RegistryEntry> {
    let Some(layout) = layout else {
        return defaults.to_vec();
    };
    match layout.load_registry() {
        Ok(Some(entries)) => entries,
        Ok(None) => defaults.to_vec(),
        Err(e) => {
            warn!("Failed to load catalog registry, using defaults: {}", e);
            defaults.to_vec()
        }
    }
}

/// Name of the file a URL is saved as.
fn file_name_for(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(sanitize_name)
        .unwrap_or_else(|| "download".to_string())
}

async fn delete_extension_files(
    layout: &ExtensionLayout,
    catalog: &str,
    extension: &str,
) -> Result<()> {
    let layout = layout.clone();
    let (catalog, extension) = (catalog.to_string(), extension.to_string());
    run_blocking(move || layout.delete_extension(&catalog, &extension)).await
}

/// Extracts on the blocking pool while forwarding progress to `on_fraction`.
async fn extract_in_background<F>(
    archive: &Path,
    dest: &Path,
    format: ArchiveFormat,
    cancel: &Cancellation,
    on_fraction: F,
) -> Result<()>
where
    F: Fn(f32),
{
    let (tx, mut rx) = watch::channel(0.0f32);
    let (archive, dest, cancel) = (archive.to_path_buf(), dest.to_path_buf(), cancel.clone());
    let mut task = tokio::task::spawn_blocking(move || {
        extract_archive(&archive, &dest, format, &cancel, &mut |fraction| {
            tx.send_replace(fraction);
        })
    });

    let mut reporting = true;
    let joined = loop {
        tokio::select! {
            joined = &mut task => break joined,
            changed = rx.changed(), if reporting => match changed {
                Ok(()) => {
                    let fraction = *rx.borrow_and_update();
                    on_fraction(fraction);
                }
                Err(_) => reporting = false,
            },
        }
    };
    flatten_join(joined)
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    flatten_join(tokio::task::spawn_blocking(f).await)
}

fn flatten_join<T>(joined: std::result::Result<Result<T>, tokio::task::JoinError>) -> Result<T> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(ExtensionError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{wait_for, zip_bytes, TestServer};
    use crate::version::VersionRange;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(root: &Path) -> ManagerConfig {
        ManagerConfig {
            extension_dir: Some(root.to_path_buf()),
            host_version: "v1.0.0".to_string(),
            ..Default::default()
        }
    }

    fn entry(name: &str, raw_uri: Url) -> RegistryEntry {
        RegistryEntry {
            name: name.to_string(),
            description: format!("{name} catalog"),
            uri: raw_uri.clone(),
            raw_uri,
            deletable: true,
        }
    }

    fn github_entry(name: &str) -> RegistryEntry {
        entry(
            name,
            Url::parse(&format!(
                "https://raw.githubusercontent.com/o/{name}/main/catalog.json"
            ))
            .unwrap(),
        )
    }

    /// An extension with releases v1.0.0 and v2.0.0 served by `server`.
    fn served_extension(server: &TestServer) -> Extension {
        server.route("/v1/ext-1.jar", 200, "main v1");
        server.route("/v2/ext-2.jar", 200, "main v2");
        server.route("/v2/dep.jar", 200, "dependency");
        server.route("/v2/optional.jar", 200, "optional");
        server.route(
            "/v2/docs.zip",
            200,
            zip_bytes(&[("index.html", b"<html/>"), ("api/a.html", b"a")]),
        );

        let v1 = Release::with_any_host("v1.0.0", server.url("/v1/ext-1.jar"), vec![], vec![], vec![]);
        let v2 = Release::with_any_host(
            "v2.0.0",
            server.url("/v2/ext-2.jar"),
            vec![server.url("/v2/dep.jar")],
            vec![server.url("/v2/optional.jar")],
            vec![server.url("/v2/docs.zip")],
        );
        Extension::new(
            "E",
            "An extension",
            "Someone",
            Url::parse("https://github.com/o/ext").unwrap(),
            vec![v1, v2],
        )
        .unwrap()
    }

    async fn install(
        manager: &ExtensionManager,
        extension: &Extension,
        release: &str,
        optional: bool,
    ) -> Result<()> {
        manager
            .install_or_update(
                "C",
                extension,
                &InstallTarget::new(release, optional),
                |_| {},
                |_, _| {},
                &Cancellation::new(),
            )
            .await
    }

    fn release_dirs(root: &Path) -> Vec<String> {
        let dir = ExtensionLayout::new(root).extension_dir("C", "E");
        let mut names: Vec<String> = fs::read_dir(dir)
            .map(|entries| {
                entries
                    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[test]
    fn test_new_rejects_malformed_host_version() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(temp_dir.path());
        config.host_version = "1.0".to_string();

        let err = ExtensionManager::new(config).err().unwrap();
        assert!(matches!(err, ExtensionError::InvalidArgument(_)));
    }

    #[test]
    fn test_new_uses_default_catalogs_then_registry() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(temp_dir.path());
        config.default_catalogs = vec![github_entry("default")];

        let manager = ExtensionManager::new(config.clone()).unwrap();
        assert_eq!(manager.catalogs(), vec![github_entry("default")]);

        ExtensionLayout::new(temp_dir.path())
            .save_registry(&[github_entry("saved")])
            .unwrap();
        let manager = ExtensionManager::new(config).unwrap();
        assert_eq!(manager.catalogs(), vec![github_entry("saved")]);
    }

    #[tokio::test]
    async fn test_add_catalogs_persists_and_skips_collisions() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ExtensionManager::new(config(temp_dir.path())).unwrap();
        let mut updates = manager.subscribe_catalogs();

        let skipped = manager
            .add_catalogs(vec![github_entry("a"), github_entry("b")])
            .await
            .unwrap();
        assert!(skipped.is_empty());
        assert!(updates.has_changed().unwrap());
        assert_eq!(updates.borrow_and_update().len(), 2);

        let skipped = manager
            .add_catalogs(vec![github_entry("b"), github_entry("c")])
            .await
            .unwrap();
        assert_eq!(skipped, vec!["b".to_string()]);

        let names: Vec<String> = manager.catalogs().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        let persisted = ExtensionLayout::new(temp_dir.path())
            .load_registry()
            .unwrap()
            .unwrap();
        assert_eq!(persisted, manager.catalogs());

        let err = manager
            .add_catalogs(vec![github_entry("a")])
            .await
            .unwrap_err();
        assert!(matches!(err, ExtensionError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_add_catalogs_rolls_back_when_registry_cannot_be_written() {
        let temp_dir = TempDir::new().unwrap();
        let registry_path = ExtensionLayout::new(temp_dir.path()).registry_path();
        fs::create_dir_all(registry_path.join("blocker")).unwrap();

        let manager = ExtensionManager::new(config(temp_dir.path())).unwrap();
        let err = manager
            .add_catalogs(vec![github_entry("a")])
            .await
            .unwrap_err();
        assert!(matches!(err, ExtensionError::Io { .. }));
        assert!(manager.catalogs().is_empty());
    }

    #[tokio::test]
    async fn test_add_catalogs_without_directory() {
        let manager = ExtensionManager::new(ManagerConfig {
            extension_dir: None,
            ..Default::default()
        })
        .unwrap();

        let err = manager
            .add_catalogs(vec![github_entry("a")])
            .await
            .unwrap_err();
        assert!(matches!(err, ExtensionError::RootUnavailable { .. }));
        assert!(manager.catalogs().is_empty());
    }

    #[tokio::test]
    async fn test_remove_catalogs() {
        let temp_dir = TempDir::new().unwrap();
        let mut locked = github_entry("builtin");
        locked.deletable = false;
        let mut config = config(temp_dir.path());
        config.default_catalogs = vec![locked.clone(), github_entry("C")];
        let manager = ExtensionManager::new(config).unwrap();

        let err = manager.remove_catalogs(&[locked], false).await.unwrap_err();
        assert!(matches!(err, ExtensionError::Conflict(_)));
        assert_eq!(manager.catalogs().len(), 2);

        let layout = ExtensionLayout::new(temp_dir.path());
        let dir = layout
            .path_for("C", "E", "v1.0.0", ArtifactKind::MainArtifact)
            .unwrap();
        fs::write(dir.join("e.jar"), b"jar").unwrap();
        let state = manager.installed_state("C", "E");
        assert!(state.borrow().is_some());

        manager
            .remove_catalogs(&[github_entry("C")], true)
            .await
            .unwrap();
        let names: Vec<String> = manager.catalogs().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["builtin"]);
        assert!(!layout.catalog_dir("C").exists());
        assert_eq!(*state.borrow(), None);
    }

    #[tokio::test]
    async fn test_remove_catalogs_rolls_back_when_registry_cannot_be_written() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(temp_dir.path());
        config.default_catalogs = vec![github_entry("C")];
        let manager = ExtensionManager::new(config).unwrap();

        let layout = ExtensionLayout::new(temp_dir.path());
        let dir = layout
            .path_for("C", "E", "v1.0.0", ArtifactKind::MainArtifact)
            .unwrap();
        fs::write(dir.join("e.jar"), b"jar").unwrap();
        fs::create_dir_all(layout.registry_path().join("blocker")).unwrap();
        let state = manager.installed_state("C", "E");

        let err = manager
            .remove_catalogs(&[github_entry("C")], true)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtensionError::Io { .. }));
        assert_eq!(manager.catalogs(), vec![github_entry("C")]);
        assert!(layout.installed_release("C", "E").unwrap().is_some());
        assert!(state.borrow().is_some());
    }

    #[tokio::test]
    async fn test_remove_catalogs_waits_for_running_install() {
        let server = TestServer::start().await;
        server.route("/main.jar", 200, "main");
        server.route_delayed("/slow-dep.jar", 200, "dependency", Duration::from_millis(300));
        let extension = Extension::new(
            "E",
            "An extension",
            "Someone",
            Url::parse("https://github.com/o/ext").unwrap(),
            vec![Release::with_any_host(
                "v1.0.0",
                server.url("/main.jar"),
                vec![server.url("/slow-dep.jar")],
                vec![],
                vec![],
            )],
        )
        .unwrap();
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(temp_dir.path());
        config.default_catalogs = vec![github_entry("C")];
        let manager = ExtensionManager::new(config).unwrap();

        let (installed, removed) = tokio::join!(
            install(&manager, &extension, "v1.0.0", false),
            async {
                assert!(
                    wait_for(Duration::from_secs(5), || server.hits("/slow-dep.jar") > 0).await
                );
                manager.remove_catalogs(&[github_entry("C")], true).await
            }
        );
        installed.unwrap();
        removed.unwrap();

        // The catalog was deleted after the install finished, never halfway.
        let layout = ExtensionLayout::new(temp_dir.path());
        assert!(!layout.catalog_dir("C").exists());
        assert_eq!(layout.installed_release("C", "E").unwrap(), None);
        assert_eq!(*manager.installed_state("C", "E").borrow(), None);
    }

    #[tokio::test]
    async fn test_dot_names_cannot_reach_other_installs() {
        let server = TestServer::start().await;
        let extension = served_extension(&server);
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(temp_dir.path());
        config.default_catalogs = vec![github_entry("C"), github_entry("..")];
        let manager = ExtensionManager::new(config).unwrap();
        install(&manager, &extension, "v1.0.0", false).await.unwrap();

        for name in ["", ".", ".."] {
            manager.remove("C", name).await.unwrap();
        }
        let unnamed = Extension::new(
            "",
            "No name",
            "Someone",
            Url::parse("https://github.com/o/unnamed").unwrap(),
            vec![Release::with_any_host("v1.0.0", server.url("/v1/ext-1.jar"), vec![], vec![], vec![])],
        )
        .unwrap();
        install(&manager, &unnamed, "v1.0.0", false).await.unwrap();
        manager
            .remove_catalogs(&[github_entry("..")], true)
            .await
            .unwrap();

        let layout = ExtensionLayout::new(temp_dir.path());
        let v1 = Some(InstalledExtension::new("v1.0.0", false));
        assert!(layout.registry_path().is_file());
        assert_eq!(layout.installed_release("C", "E").unwrap(), v1);
        assert_eq!(layout.installed_release("C", "").unwrap(), v1);
        assert_eq!(*manager.installed_state("C", "E").borrow(), v1);
        assert_eq!(*manager.installed_state("C", "").borrow(), v1);
    }

    #[tokio::test]
    async fn test_install_then_update_keeps_one_release() {
        let server = TestServer::start().await;
        let extension = served_extension(&server);
        let temp_dir = TempDir::new().unwrap();
        let manager = ExtensionManager::new(config(temp_dir.path())).unwrap();
        let state = manager.installed_state("C", "E");
        assert_eq!(*state.borrow(), None);

        install(&manager, &extension, "v1.0.0", false).await.unwrap();
        assert_eq!(
            *state.borrow(),
            Some(InstalledExtension::new("v1.0.0", false))
        );

        install(&manager, &extension, "v2.0.0", true).await.unwrap();
        assert_eq!(
            *state.borrow(),
            Some(InstalledExtension::new("v2.0.0", true))
        );
        assert_eq!(release_dirs(temp_dir.path()), vec!["v2.0.0"]);

        let release = ExtensionLayout::new(temp_dir.path()).release_dir("C", "E", "v2.0.0");
        assert_eq!(
            fs::read_to_string(release.join("main-artifact/ext-2.jar")).unwrap(),
            "main v2"
        );
        assert!(release.join("required-deps/dep.jar").exists());
        assert!(release.join("optional-deps/optional.jar").exists());
        assert!(release.join("docs/index.html").exists());
        assert!(release.join("docs/api/a.html").exists());
        assert!(!release.join("docs/docs.zip").exists());

        // What is on disk matches the reported state.
        assert_eq!(
            ExtensionLayout::new(temp_dir.path())
                .installed_release("C", "E")
                .unwrap(),
            state.borrow().clone()
        );
    }

    #[tokio::test]
    async fn test_install_is_idempotent() {
        let server = TestServer::start().await;
        let extension = served_extension(&server);
        let temp_dir = TempDir::new().unwrap();
        let manager = ExtensionManager::new(config(temp_dir.path())).unwrap();

        install(&manager, &extension, "v2.0.0", false).await.unwrap();
        let first = manager.installed_state("C", "E").borrow().clone();
        install(&manager, &extension, "v2.0.0", false).await.unwrap();

        assert_eq!(manager.installed_state("C", "E").borrow().clone(), first);
        let release = ExtensionLayout::new(temp_dir.path()).release_dir("C", "E", "v2.0.0");
        assert_eq!(fs::read_dir(release.join("main-artifact")).unwrap().count(), 1);
        assert!(!release.join("optional-deps").exists());
    }

    #[tokio::test]
    async fn test_install_reports_steps_and_progress() {
        let server = TestServer::start().await;
        let extension = served_extension(&server);
        let temp_dir = TempDir::new().unwrap();
        let manager = ExtensionManager::new(config(temp_dir.path())).unwrap();

        let progress = Mutex::new(Vec::new());
        let steps = Mutex::new(Vec::new());
        manager
            .install_or_update(
                "C",
                &extension,
                &InstallTarget::new("v2.0.0", true),
                |p| progress.lock().push(p),
                |step, label| steps.lock().push((step, label.to_string())),
                &Cancellation::new(),
            )
            .await
            .unwrap();

        let steps = steps.into_inner();
        assert_eq!(steps.len(), 5);
        assert_eq!(steps[0], (InstallStep::Downloading, server.url("/v2/ext-2.jar").to_string()));
        assert_eq!(steps[3].0, InstallStep::Downloading);
        assert_eq!(steps[4], (InstallStep::Extracting, "docs.zip".to_string()));

        let progress = progress.into_inner();
        assert!(progress.windows(2).all(|w| w[0] <= w[1] + 1e-6));
        assert!((progress.last().unwrap() - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_failed_install_marks_absent() {
        let server = TestServer::start().await;
        let extension = served_extension(&server);
        let temp_dir = TempDir::new().unwrap();
        let manager = ExtensionManager::new(config(temp_dir.path())).unwrap();
        install(&manager, &extension, "v1.0.0", false).await.unwrap();

        let err = install(&manager, &extension, "v9.0.0", false).await.unwrap_err();
        assert!(matches!(err, ExtensionError::NotFound(_)));
        assert_eq!(*manager.installed_state("C", "E").borrow(), None);
        assert!(release_dirs(temp_dir.path()).is_empty());

        let broken = Extension::new(
            "E",
            "An extension",
            "Someone",
            Url::parse("https://github.com/o/ext").unwrap(),
            vec![Release::with_any_host("v3.0.0", server.url("/missing.jar"), vec![], vec![], vec![])],
        )
        .unwrap();
        let err = install(&manager, &broken, "v3.0.0", false).await.unwrap_err();
        assert!(matches!(err, ExtensionError::Remote { status: 404, .. }));
        assert_eq!(*manager.installed_state("C", "E").borrow(), None);
    }

    #[tokio::test]
    async fn test_cancelled_install() {
        let server = TestServer::start().await;
        let extension = served_extension(&server);
        let temp_dir = TempDir::new().unwrap();
        let manager = ExtensionManager::new(config(temp_dir.path())).unwrap();

        let cancel = Cancellation::new();
        cancel.cancel();
        let err = manager
            .install_or_update(
                "C",
                &extension,
                &InstallTarget::new("v1.0.0", false),
                |_| {},
                |_, _| {},
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(*manager.installed_state("C", "E").borrow(), None);
    }

    #[tokio::test]
    async fn test_concurrent_installs_end_in_one_consistent_state() {
        let server = TestServer::start().await;
        let extension = served_extension(&server);
        let temp_dir = TempDir::new().unwrap();
        let manager = ExtensionManager::new(config(temp_dir.path())).unwrap();

        let (a, b) = tokio::join!(
            install(&manager, &extension, "v1.0.0", false),
            install(&manager, &extension, "v2.0.0", false),
        );
        a.unwrap();
        b.unwrap();

        let state = manager.installed_state("C", "E").borrow().clone().unwrap();
        assert!(state.release_name == "v1.0.0" || state.release_name == "v2.0.0");
        assert_eq!(release_dirs(temp_dir.path()), vec![state.release_name.clone()]);
        assert_eq!(
            ExtensionLayout::new(temp_dir.path())
                .installed_release("C", "E")
                .unwrap(),
            Some(state)
        );
    }

    #[tokio::test]
    async fn test_remove_extension() {
        let server = TestServer::start().await;
        let extension = served_extension(&server);
        let temp_dir = TempDir::new().unwrap();
        let manager = ExtensionManager::new(config(temp_dir.path())).unwrap();
        install(&manager, &extension, "v1.0.0", false).await.unwrap();

        manager.remove("C", "E").await.unwrap();
        assert_eq!(*manager.installed_state("C", "E").borrow(), None);
        assert!(release_dirs(temp_dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_remove_failure_keeps_state() {
        let server = TestServer::start().await;
        let extension = served_extension(&server);
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("extensions");
        let manager = ExtensionManager::new(config(&root)).unwrap();
        install(&manager, &extension, "v1.0.0", false).await.unwrap();
        let state = manager.installed_state("C", "E");

        fs::remove_dir_all(&root).unwrap();
        fs::write(&root, b"not a directory").unwrap();

        let err = manager.remove("C", "E").await.unwrap_err();
        assert!(matches!(err, ExtensionError::RootUnavailable { .. }));
        assert_eq!(
            *state.borrow(),
            Some(InstalledExtension::new("v1.0.0", false))
        );
    }

    #[tokio::test]
    async fn test_available_updates() {
        let server = TestServer::start().await;
        let release = |name: &str, min: &str, max: Option<&str>| {
            let mut range = json!({ "min": min });
            if let Some(max) = max {
                range["max"] = json!(max);
            }
            json!({
                "name": name,
                "mainUrl": format!("https://github.com/o/ext/releases/download/{name}/ext.jar"),
                "requiredDependencyUrls": [],
                "optionalDependencyUrls": [],
                "javadocUrls": [],
                "versionRange": range
            })
        };
        let body = json!({
            "name": "C",
            "description": "Test catalog",
            "extensions": [
                {
                    "name": "E",
                    "description": "d",
                    "author": "a",
                    "homepage": "https://github.com/o/ext",
                    "releases": [
                        release("v1.0.0", "v1.0.0", None),
                        release("v1.5.0", "v1.0.0", Some("v1.0.0")),
                        release("v3.0.0", "v2.0.0", None)
                    ]
                },
                {
                    "name": "NotInstalled",
                    "description": "d",
                    "author": "a",
                    "homepage": "https://github.com/o/other",
                    "releases": [release("v1.0.0", "v1.0.0", None)]
                }
            ]
        });
        server.route("/catalog.json", 200, body.to_string());

        let temp_dir = TempDir::new().unwrap();
        let mut config = config(temp_dir.path());
        config.default_catalogs = vec![entry("C", server.url("/catalog.json"))];
        let layout = ExtensionLayout::new(temp_dir.path());
        let dir = layout
            .path_for("C", "E", "v1.0.0", ArtifactKind::MainArtifact)
            .unwrap();
        fs::write(dir.join("ext.jar"), b"jar").unwrap();

        let manager = ExtensionManager::new(config).unwrap();
        let updates = manager.available_updates().await.unwrap();
        assert_eq!(
            updates,
            vec![UpdateAvailable {
                catalog_name: "C".to_string(),
                extension_name: "E".to_string(),
                current_release: "v1.0.0".to_string(),
                new_release: "v1.5.0".to_string(),
            }]
        );
        assert_eq!(server.hits("/catalog.json"), 1);
    }

    #[tokio::test]
    async fn test_available_updates_propagates_fetch_errors() {
        let server = TestServer::start().await;
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(temp_dir.path());
        config.default_catalogs = vec![entry("C", server.url("/gone.json"))];
        let manager = ExtensionManager::new(config).unwrap();

        let err = manager.available_updates().await.unwrap_err();
        assert!(matches!(err, ExtensionError::Remote { status: 404, .. }));
    }

    #[test]
    fn test_release_selection_uses_host_version() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ExtensionManager::new(config(temp_dir.path())).unwrap();
        let release = |name: &str, min: &str| {
            Release::new(
                name,
                Url::parse("https://github.com/o/ext/releases/download/x/ext.jar").unwrap(),
                vec![],
                vec![],
                vec![],
                VersionRange::at_least(Version::parse(min).unwrap()),
            )
            .unwrap()
        };
        let extension = Extension::new(
            "E",
            "d",
            "a",
            Url::parse("https://github.com/o/ext").unwrap(),
            vec![
                release("v0.1.0", "v0.1.0"),
                release("v0.2.0", "v1.0.0"),
                release("v0.3.0", "v2.0.0"),
            ],
        )
        .unwrap();

        assert_eq!(
            manager.max_compatible_release(&extension).unwrap().name(),
            "v0.2.0"
        );
        let names: Vec<&str> = manager
            .compatible_releases(&extension)
            .into_iter()
            .map(|r| r.name())
            .collect();
        assert_eq!(names, vec!["v0.2.0", "v0.1.0"]);
    }

    #[tokio::test]
    async fn test_manual_files_exclude_catalog_installs() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("dropped.jar"), b"jar").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), b"txt").unwrap();
        let layout = ExtensionLayout::new(temp_dir.path());
        let dir = layout
            .path_for("C", "E", "v1.0.0", ArtifactKind::MainArtifact)
            .unwrap();
        fs::write(dir.join("managed.jar"), b"jar").unwrap();

        let manager = ExtensionManager::new(config(temp_dir.path())).unwrap();
        assert_eq!(
            manager.manually_installed_files(),
            vec![temp_dir.path().join("dropped.jar")]
        );

        let later = temp_dir.path().join("later.jar");
        fs::write(&later, b"jar").unwrap();
        assert!(
            wait_for(Duration::from_secs(5), || manager
                .manually_installed_files()
                .contains(&later))
            .await
        );
    }

    #[tokio::test]
    async fn test_set_extension_directory() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        ExtensionLayout::new(second.path())
            .save_registry(&[github_entry("other")])
            .unwrap();
        let dir = ExtensionLayout::new(second.path())
            .path_for("C", "E", "v1.0.0", ArtifactKind::MainArtifact)
            .unwrap();
        fs::write(dir.join("e.jar"), b"jar").unwrap();
        fs::write(second.path().join("manual.jar"), b"jar").unwrap();

        let manager = ExtensionManager::new(config(first.path())).unwrap();
        let state = manager.installed_state("C", "E");
        assert_eq!(*state.borrow(), None);

        manager
            .set_extension_directory(Some(second.path().to_path_buf()))
            .await;
        assert_eq!(manager.extension_directory(), Some(second.path().to_path_buf()));
        assert_eq!(manager.catalogs(), vec![github_entry("other")]);
        assert_eq!(
            *state.borrow(),
            Some(InstalledExtension::new("v1.0.0", false))
        );
        assert_eq!(
            manager.manually_installed_files(),
            vec![second.path().join("manual.jar")]
        );

        manager.set_extension_directory(None).await;
        assert_eq!(*state.borrow(), None);
        assert!(manager.manually_installed_files().is_empty());
        assert!(manager.catalogs().is_empty());
    }

    #[test]
    fn test_file_name_for() {
        assert_eq!(
            file_name_for(&Url::parse("https://github.com/o/r/releases/download/v1/ext.jar").unwrap()),
            "ext.jar"
        );
        assert_eq!(file_name_for(&Url::parse("https://example.com/").unwrap()), "download");
        assert_eq!(
            file_name_for(&Url::parse("https://example.com/a/registry.json").unwrap()),
            "_registry.json"
        );
    }
}
