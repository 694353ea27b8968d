//! Archive extraction for downloaded release files.
//!
//! Zip archives are what catalogs usually ship; tar.gz and tar.xz are
//! accepted as well. Plain `.jar` files are never unpacked.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path};

use tracing::{debug, info, warn};

use super::cancel::Cancellation;
use crate::error::{ExtensionError, Result};

// ============================================================================
// Archive Format
// ============================================================================

/// Archive formats that are unpacked after download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
    TarXz,
}

impl ArchiveFormat {
    /// Detects the format from the file name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.xz") {
            Some(Self::TarXz)
        } else {
            None
        }
    }
}

// ============================================================================
// Archive Extraction
// ============================================================================

/// Extracts an archive into `dest_dir`.
///
/// `progress` receives the completed share (0.0 to 1.0). Entries that would
/// land outside `dest_dir` are skipped, as are links in tar archives.
pub fn extract_archive(
    archive_path: &Path,
    dest_dir: &Path,
    format: ArchiveFormat,
    cancel: &Cancellation,
    progress: &mut dyn FnMut(f32),
) -> Result<()> {
    info!(
        "Extracting {:?} archive {} to {}",
        format,
        archive_path.display(),
        dest_dir.display()
    );

    fs::create_dir_all(dest_dir).map_err(|e| ExtensionError::io(dest_dir, e))?;

    match format {
        ArchiveFormat::Zip => extract_zip(archive_path, dest_dir, cancel, progress),
        ArchiveFormat::TarGz => {
            let (reader, len) = open_counted(archive_path)?;
            let counter = reader.counter();
            let decoder = flate2::read::GzDecoder::new(reader);
            extract_tar(decoder, archive_path, dest_dir, cancel, &mut || {
                progress(counter.fraction(len))
            })
        }
        ArchiveFormat::TarXz => {
            let (reader, len) = open_counted(archive_path)?;
            let counter = reader.counter();
            let decoder = xz2::read::XzDecoder::new(reader);
            extract_tar(decoder, archive_path, dest_dir, cancel, &mut || {
                progress(counter.fraction(len))
            })
        }
    }?;

    progress(1.0);
    Ok(())
}

// ============================================================================
// ZIP Extraction
// ============================================================================

fn extract_zip(
    archive_path: &Path,
    dest_dir: &Path,
    cancel: &Cancellation,
    progress: &mut dyn FnMut(f32),
) -> Result<()> {
    let file = File::open(archive_path).map_err(|e| ExtensionError::io(archive_path, e))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|e| invalid_archive(archive_path, e))?;

    let total = archive.len();
    for i in 0..total {
        cancel.check()?;
        let mut entry = archive
            .by_index(i)
            .map_err(|e| invalid_archive(archive_path, e))?;
        let Some(entry_path) = entry.enclosed_name() else {
            debug!("Skipping unsafe path in zip");
            continue;
        };
        let dest_path = dest_dir.join(entry_path);

        if entry.is_dir() {
            fs::create_dir_all(&dest_path).map_err(|e| ExtensionError::io(&dest_path, e))?;
        } else {
            if let Some(parent) = dest_path.parent() {
                fs::create_dir_all(parent).map_err(|e| ExtensionError::io(parent, e))?;
            }
            let mut outfile =
                File::create(&dest_path).map_err(|e| ExtensionError::io(&dest_path, e))?;
            io::copy(&mut entry, &mut outfile).map_err(|e| ExtensionError::io(&dest_path, e))?;
        }

        progress((i + 1) as f32 / total as f32);
    }

    debug!("ZIP extraction complete");
    Ok(())
}

// ============================================================================
// TAR Extraction
// ============================================================================

fn extract_tar<R: Read>(
    reader: R,
    archive_path: &Path,
    dest_dir: &Path,
    cancel: &Cancellation,
    on_entry: &mut dyn FnMut(),
) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    let dest_dir_canonical = dest_dir
        .canonicalize()
        .map_err(|e| ExtensionError::io(dest_dir, e))?;

    let entries = archive
        .entries()
        .map_err(|e| invalid_archive(archive_path, e))?;
    for entry in entries {
        cancel.check()?;
        let mut entry = entry.map_err(|e| invalid_archive(archive_path, e))?;
        let entry_type = entry.header().entry_type();

        if entry_type.is_symlink() || entry_type.is_hard_link() {
            warn!("Skipping link in tar archive {}", archive_path.display());
            continue;
        }

        let path = entry
            .path()
            .map_err(|e| invalid_archive(archive_path, e))?
            .into_owned();
        if path.is_absolute() || path.components().any(|c| c == Component::ParentDir) {
            warn!("Skipping unsafe path in tar: {:?}", path);
            continue;
        }

        let dest_path = dest_dir.join(&path);
        if entry_type.is_dir() {
            fs::create_dir_all(&dest_path).map_err(|e| ExtensionError::io(&dest_path, e))?;
        } else if entry_type.is_file() {
            let Some(parent) = dest_path.parent() else {
                continue;
            };
            fs::create_dir_all(parent).map_err(|e| ExtensionError::io(parent, e))?;
            let parent_canonical = parent
                .canonicalize()
                .map_err(|e| ExtensionError::io(parent, e))?;
            if !parent_canonical.starts_with(&dest_dir_canonical) {
                warn!("Skipping path that escapes {}: {:?}", dest_dir.display(), path);
                continue;
            }

            let mut outfile =
                File::create(&dest_path).map_err(|e| ExtensionError::io(&dest_path, e))?;
            io::copy(&mut entry, &mut outfile).map_err(|e| ExtensionError::io(&dest_path, e))?;
        }

        on_entry();
    }

    debug!("TAR extraction complete");
    Ok(())
}

fn invalid_archive(archive_path: &Path, e: impl std::fmt::Display) -> ExtensionError {
    ExtensionError::malformed(archive_path.display().to_string(), e.to_string())
}

// ============================================================================
// Progress For Compressed Streams
// ============================================================================

/// Counts the compressed bytes consumed, since tar archives have no entry
/// count up front.
struct CountingReader<R> {
    inner: R,
    read: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

#[derive(Clone)]
struct ByteCounter(std::sync::Arc<std::sync::atomic::AtomicU64>);

impl ByteCounter {
    fn fraction(&self, total: u64) -> f32 {
        if total == 0 {
            return 0.0;
        }
        let read = self.0.load(std::sync::atomic::Ordering::Relaxed);
        (read as f32 / total as f32).min(1.0)
    }
}

impl<R> CountingReader<R> {
    fn counter(&self) -> ByteCounter {
        ByteCounter(self.read.clone())
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read
            .fetch_add(n as u64, std::sync::atomic::Ordering::Relaxed);
        Ok(n)
    }
}

fn open_counted(archive_path: &Path) -> Result<(CountingReader<BufReader<File>>, u64)> {
    let file = File::open(archive_path).map_err(|e| ExtensionError::io(archive_path, e))?;
    let len = file
        .metadata()
        .map_err(|e| ExtensionError::io(archive_path, e))?
        .len();
    let reader = CountingReader {
        inner: BufReader::new(file),
        read: Default::default(),
    };
    Ok((reader, len))
}
