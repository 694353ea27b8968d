//! One-shot bounded scan of a directory tree.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

/// Deepest level below the watched root that is observed. Files may sit at
/// this depth; directories at this depth are not descended into.
pub const MAX_DEPTH: usize = 8;

/// What a scan found.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanResult {
    /// Matching files.
    pub files: Vec<PathBuf>,
    /// Directories to watch, with their depth below the watched root. The
    /// scanned directory itself comes first.
    pub dirs: Vec<(PathBuf, usize)>,
}

/// Walks `dir`, which sits `depth` levels below the watched root.
///
/// Directories matching `skip_dir` are neither reported nor entered. A missing
/// or unreadable directory yields what could be read.
pub fn initial_scan(
    dir: &Path,
    depth: usize,
    is_file: &dyn Fn(&Path) -> bool,
    skip_dir: &dyn Fn(&Path) -> bool,
) -> ScanResult {
    let mut result = ScanResult::default();
    if depth >= MAX_DEPTH {
        return result;
    }

    let walker = WalkDir::new(dir)
        .max_depth(MAX_DEPTH - depth)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_type().is_dir() || !skip_dir(e.path()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry under {}: {}", dir.display(), e);
                continue;
            }
        };

        let absolute_depth = depth + entry.depth();
        if entry.file_type().is_dir() {
            if absolute_depth < MAX_DEPTH {
                result.dirs.push((entry.into_path(), absolute_depth));
            }
        } else if is_file(entry.path()) {
            result.files.push(entry.into_path());
        }
    }

    result
}
