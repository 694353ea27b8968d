//! Observable installed-state cells, one per (catalog, extension).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{watch, RwLock};

use crate::storage::{sanitize_name, InstalledExtension};

/// Identifies the on-disk slot of an extension within a catalog.
///
/// Names are stored sanitized, so two names that map to the same directory
/// share one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtensionKey {
    pub catalog: String,
    pub extension: String,
}

impl ExtensionKey {
    pub fn new(catalog: &str, extension: &str) -> Self {
        Self {
            catalog: sanitize_name(catalog),
            extension: sanitize_name(extension),
        }
    }
}

/// The installed state of one extension plus the lock that serializes its
/// transitions.
#[derive(Debug)]
pub struct StateCell {
    value: watch::Sender<Option<InstalledExtension>>,
    transition: tokio::sync::Mutex<()>,
}

impl StateCell {
    fn new(initial: Option<InstalledExtension>) -> Self {
        let (value, _) = watch::channel(initial);
        Self {
            value,
            transition: tokio::sync::Mutex::new(()),
        }
    }

    pub fn get(&self) -> Option<InstalledExtension> {
        self.value.borrow().clone()
    }

    pub fn set(&self, installed: Option<InstalledExtension>) {
        self.value.send_replace(installed);
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<InstalledExtension>> {
        self.value.subscribe()
    }

    /// Waits for exclusive access to this extension's files and state.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.transition.lock().await
    }
}

/// Lazily populated map of state cells.
///
/// Besides the per-extension locks there is one lock per catalog directory:
/// installs and removals of single extensions hold it shared, deleting the
/// whole catalog holds it exclusively.
#[derive(Debug, Default)]
pub struct InstalledStates {
    cells: Mutex<HashMap<ExtensionKey, Arc<StateCell>>>,
    catalogs: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl InstalledStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cell for `key`, creating it from `load` on first access.
    ///
    /// `load` runs under the map lock, so it is called at most once per key.
    pub fn cell(
        &self,
        key: &ExtensionKey,
        load: impl FnOnce() -> Option<InstalledExtension>,
    ) -> Arc<StateCell> {
        self.cells
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(StateCell::new(load())))
            .clone()
    }

    /// The lock guarding the directory of `catalog`.
    pub fn catalog_lock(&self, catalog: &str) -> Arc<RwLock<()>> {
        self.catalogs
            .lock()
            .entry(sanitize_name(catalog))
            .or_default()
            .clone()
    }

    /// Reloads every existing cell. Subscribers stay connected.
    pub fn refresh_all(&self, load: impl FnMut(&ExtensionKey) -> Option<InstalledExtension>) {
        self.refresh_where(|_| true, load);
    }

    /// Reloads the cells belonging to one catalog.
    pub fn refresh_catalog(
        &self,
        catalog: &str,
        load: impl FnMut(&ExtensionKey) -> Option<InstalledExtension>,
    ) {
        let catalog = sanitize_name(catalog);
        self.refresh_where(|key| key.catalog == catalog, load);
    }

    fn refresh_where(
        &self,
        filter: impl Fn(&ExtensionKey) -> bool,
        mut load: impl FnMut(&ExtensionKey) -> Option<InstalledExtension>,
    ) {
        let cells: Vec<(ExtensionKey, Arc<StateCell>)> = self
            .cells
            .lock()
            .iter()
            .filter(|(k, _)| filter(k))
            .map(|(k, c)| (k.clone(), c.clone()))
            .collect();
        for (key, cell) in cells {
            cell.set(load(&key));
        }
    }
}
