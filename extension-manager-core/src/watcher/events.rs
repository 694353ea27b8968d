//! Translation of file system notifications into watcher actions.
//!
//! Kept free of I/O so every case can be tested without a real watcher.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind};

use super::scan::MAX_DEPTH;

/// A path appeared or disappeared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Created(PathBuf),
    Removed(PathBuf),
}

/// What the watcher should do in response to a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchAction {
    /// Watch a new directory and scan what it already contains.
    ScanDir { path: PathBuf, depth: usize },
    UnregisterDir(PathBuf),
    AddFile(PathBuf),
    RemoveFile(PathBuf),
}

/// Splits a notify event into creations and removals.
///
/// Renames become a removal of the old name and a creation of the new one.
/// Content modifications are ignored.
pub fn changes_from_event(event: &Event) -> Vec<Change> {
    match &event.kind {
        EventKind::Create(_) => event.paths.iter().cloned().map(Change::Created).collect(),
        EventKind::Remove(_) => event.paths.iter().cloned().map(Change::Removed).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => event.paths.iter().cloned().map(Change::Removed).collect(),
            RenameMode::To => event.paths.iter().cloned().map(Change::Created).collect(),
            RenameMode::Both => {
                let mut changes = Vec::new();
                if let Some(from) = event.paths.first() {
                    changes.push(Change::Removed(from.clone()));
                }
                if let Some(to) = event.paths.get(1) {
                    changes.push(Change::Created(to.clone()));
                }
                changes
            }
            _ => event
                .paths
                .iter()
                .map(|p| {
                    if p.exists() {
                        Change::Created(p.clone())
                    } else {
                        Change::Removed(p.clone())
                    }
                })
                .collect(),
        },
        _ => Vec::new(),
    }
}

/// Decides what to do about one change.
///
/// `is_dir` tells whether a created path is a directory; it is ignored for
/// removals, where the path no longer exists. A removal cascades to every
/// tracked file and directory below the removed path.
pub fn translate(
    change: &Change,
    is_dir: bool,
    tracked_files: &BTreeSet<PathBuf>,
    tracked_dirs: &HashMap<PathBuf, usize>,
    is_file: &dyn Fn(&Path) -> bool,
    skip_dir: &dyn Fn(&Path) -> bool,
) -> Vec<WatchAction> {
    match change {
        Change::Created(path) => {
            let Some(parent_depth) = path.parent().and_then(|p| tracked_dirs.get(p)) else {
                return Vec::new();
            };
            let depth = parent_depth + 1;

            if is_dir {
                if depth < MAX_DEPTH && !skip_dir(path) {
                    vec![WatchAction::ScanDir {
                        path: path.clone(),
                        depth,
                    }]
                } else {
                    Vec::new()
                }
            } else if !tracked_files.contains(path) && is_file(path) {
                vec![WatchAction::AddFile(path.clone())]
            } else {
                Vec::new()
            }
        }
        Change::Removed(path) => {
            let mut actions: Vec<WatchAction> = tracked_files
                .iter()
                .filter(|f| f.starts_with(path))
                .cloned()
                .map(WatchAction::RemoveFile)
                .collect();

            let mut dirs: Vec<&PathBuf> = tracked_dirs
                .keys()
                .filter(|d| d.starts_with(path))
                .collect();
            dirs.sort();
            actions.extend(dirs.into_iter().cloned().map(WatchAction::UnregisterDir));
            actions
        }
    }
}
