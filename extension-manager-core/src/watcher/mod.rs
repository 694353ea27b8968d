//! Live view of the files below a directory.
//!
//! A [`FileWatcher`] keeps the set of matching files under a root directory up
//! to [`MAX_DEPTH`] levels deep and broadcasts a [`WatchEvent`] for every file
//! that appears or disappears. It only observes: nothing here creates or
//! deletes files.
//!
//! The pieces are split for testing:
//! - [`scan::initial_scan`] walks a tree once
//! - the registration table maps watched directories to their depth
//! - [`events::translate`] turns one notification into [`events::WatchAction`]s

pub mod events;
pub mod scan;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Weak};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use events::{changes_from_event, translate, Change, WatchAction};
pub use scan::MAX_DEPTH;

/// Capacity of the event channel; slow subscribers see `Lagged`.
const EVENT_CAPACITY: usize = 256;

type PathPredicate = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// A matching file appeared or disappeared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Added(PathBuf),
    Removed(PathBuf),
}

/// Watches a directory tree for files accepted by a predicate.
#[derive(Clone)]
pub struct FileWatcher {
    inner: Arc<Inner>,
}

struct Inner {
    is_file: PathPredicate,
    skip_dir: PathPredicate,
    files: RwLock<BTreeSet<PathBuf>>,
    state: Mutex<WatchState>,
    events: broadcast::Sender<WatchEvent>,
}

#[derive(Default)]
struct WatchState {
    root: Option<PathBuf>,
    /// Registration table: watched directory to depth below the root.
    dirs: HashMap<PathBuf, usize>,
    watcher: Option<RecommendedWatcher>,
    /// Bumped on every re-root so late events from an old watcher are dropped.
    generation: u64,
}

impl FileWatcher {
    /// Creates a watcher with no root.
    ///
    /// `is_file` selects the files to report; directories for which
    /// `skip_dir` returns true are not entered.
    pub fn new<F, S>(is_file: F, skip_dir: S) -> Self
    where
        F: Fn(&Path) -> bool + Send + Sync + 'static,
        S: Fn(&Path) -> bool + Send + Sync + 'static,
    {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                is_file: Arc::new(is_file),
                skip_dir: Arc::new(skip_dir),
                files: RwLock::new(BTreeSet::new()),
                state: Mutex::new(WatchState::default()),
                events,
            }),
        }
    }

    /// Points the watcher at a new root.
    ///
    /// The previous watch is torn down and `Removed` is sent for every file it
    /// reported. Files already present under the new root are then reported as
    /// `Added`. `None` or a path that is not a directory leaves the watcher
    /// idle with no files.
    pub fn set_root(&self, root: Option<PathBuf>) {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        state.generation += 1;
        state.watcher = None;
        state.dirs.clear();
        state.root = None;
        let cleared = std::mem::take(&mut *inner.files.write());
        for file in cleared {
            inner.emit(WatchEvent::Removed(file));
        }

        let Some(root) = root else {
            debug!("File watcher stopped");
            return;
        };
        if !root.is_dir() {
            warn!("Not watching {}: not a directory", root.display());
            return;
        }

        let (tx, rx) = mpsc::channel();
        match RecommendedWatcher::new(tx, notify::Config::default()) {
            Ok(watcher) => state.watcher = Some(watcher),
            Err(e) => {
                warn!("Failed to create file watcher for {}: {}", root.display(), e);
                return;
            }
        }
        state.root = Some(root.clone());

        let generation = state.generation;
        let weak = Arc::downgrade(inner);
        let spawned = std::thread::Builder::new()
            .name("extension-watcher".to_string())
            .spawn(move || process_events(weak, rx, generation));
        if let Err(e) = spawned {
            warn!("Failed to start file watcher thread: {}", e);
            state.watcher = None;
            state.root = None;
            return;
        }

        inner.apply(&mut state, WatchAction::ScanDir { path: root.clone(), depth: 0 });
        info!(
            "Watching {} ({} files, {} directories)",
            root.display(),
            inner.files.read().len(),
            state.dirs.len()
        );
    }

    pub fn root(&self) -> Option<PathBuf> {
        self.inner.state.lock().root.clone()
    }

    /// Snapshot of the matching files, sorted.
    pub fn files(&self) -> Vec<PathBuf> {
        self.inner.files.read().iter().cloned().collect()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.inner.files.read().contains(path)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.inner.events.subscribe()
    }
}

impl Inner {
    fn emit(&self, event: WatchEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn apply(&self, state: &mut WatchState, action: WatchAction) {
        match action {
            WatchAction::ScanDir { path, depth } => {
                if let Some(watcher) = state.watcher.as_mut() {
                    if let Err(e) = watcher.watch(&path, RecursiveMode::NonRecursive) {
                        warn!("Failed to watch {}: {}", path.display(), e);
                        return;
                    }
                }
                state.dirs.insert(path.clone(), depth);

                let found = scan::initial_scan(&path, depth, &*self.is_file, &*self.skip_dir);
                for (dir, dir_depth) in found.dirs.into_iter().skip(1) {
                    if let Some(watcher) = state.watcher.as_mut() {
                        if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
                            warn!("Failed to watch {}: {}", dir.display(), e);
                            continue;
                        }
                    }
                    state.dirs.insert(dir, dir_depth);
                }
                for file in found.files {
                    self.apply(state, WatchAction::AddFile(file));
                }
            }
            WatchAction::UnregisterDir(path) => {
                state.dirs.remove(&path);
                if let Some(watcher) = state.watcher.as_mut() {
                    // The OS usually dropped the watch along with the directory.
                    if let Err(e) = watcher.unwatch(&path) {
                        debug!("Unwatch {}: {}", path.display(), e);
                    }
                }
            }
            WatchAction::AddFile(path) => {
                if self.files.write().insert(path.clone()) {
                    debug!("File added: {}", path.display());
                    self.emit(WatchEvent::Added(path));
                }
            }
            WatchAction::RemoveFile(path) => {
                if self.files.write().remove(&path) {
                    debug!("File removed: {}", path.display());
                    self.emit(WatchEvent::Removed(path));
                }
            }
        }
    }

    fn handle_change(&self, state: &mut WatchState, change: Change) {
        let is_dir = match &change {
            Change::Created(path) => match std::fs::symlink_metadata(path) {
                Ok(meta) => meta.is_dir(),
                // Already gone again; the removal event follows.
                Err(_) => return,
            },
            Change::Removed(_) => false,
        };

        let actions = {
            let files = self.files.read();
            translate(
                &change,
                is_dir,
                &files,
                &state.dirs,
                &*self.is_file,
                &*self.skip_dir,
            )
        };
        for action in actions {
            self.apply(state, action);
        }
    }
}

/// Runs on the watcher thread until the watcher it belongs to is dropped.
///
/// Registration happens here rather than in the notify callback because
/// adding a watch from inside the callback blocks the backend.
fn process_events(inner: Weak<Inner>, rx: mpsc::Receiver<notify::Result<notify::Event>>, generation: u64) {
    for result in rx {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                warn!("File watcher error: {}", e);
                continue;
            }
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };

        let mut state = inner.state.lock();
        if state.generation != generation {
            break;
        }
        for change in changes_from_event(&event) {
            inner.handle_change(&mut state, change);
        }
    }
    debug!("File watcher thread exiting");
}
