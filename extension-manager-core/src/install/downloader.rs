//! Streaming file downloads with progress reporting and cancellation.

use std::io;
use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use super::cancel::Cancellation;
use crate::catalog::fetch::check_scheme;
use crate::error::{ExtensionError, Result};

// ============================================================================
// Download Progress
// ============================================================================

/// Progress information during a download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    /// Bytes downloaded so far.
    pub bytes_downloaded: u64,
    /// Total bytes expected (if known from Content-Length header).
    pub total_bytes: Option<u64>,
    /// Completed share (0.0 to 1.0), or None if total is unknown.
    pub fraction: Option<f32>,
}

impl DownloadProgress {
    fn new(bytes_downloaded: u64, total_bytes: Option<u64>) -> Self {
        let fraction = total_bytes.map(|total| {
            if total > 0 {
                (bytes_downloaded as f32 / total as f32).min(1.0)
            } else {
                0.0
            }
        });

        Self {
            bytes_downloaded,
            total_bytes,
            fraction,
        }
    }
}

// ============================================================================
// Downloader
// ============================================================================

/// Downloads files over HTTP.
///
/// The timeout bounds connecting and each wait for the next chunk, not the
/// whole transfer, so large files can take as long as they need.
#[derive(Debug, Clone)]
pub struct Downloader {
    http: reqwest::Client,
    idle_timeout: Duration,
}

impl Downloader {
    pub fn new(idle_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(idle_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| ExtensionError::http("client", e))?;

        Ok(Self { http, idle_timeout })
    }

    /// Downloads `url` to `dest`, returning the number of bytes written.
    ///
    /// `progress_cb` is called once before the first chunk and after every
    /// chunk. A partial file is left behind on failure.
    pub async fn download_file<F>(
        &self,
        url: &Url,
        dest: &Path,
        cancel: &Cancellation,
        mut progress_cb: F,
    ) -> Result<u64>
    where
        F: FnMut(DownloadProgress),
    {
        info!("Downloading {} to {}", url, dest.display());
        check_scheme(url)?;
        cancel.check()?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ExtensionError::io(parent, e))?;
        }

        let response = tokio::time::timeout(self.idle_timeout, self.http.get(url.clone()).send())
            .await
            .map_err(|_| self.timed_out(url, dest))?
            .map_err(|e| ExtensionError::http(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtensionError::Remote {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let total_bytes = response.content_length();
        debug!("Content-Length: {:?}", total_bytes);

        let mut file = File::create(dest)
            .await
            .map_err(|e| ExtensionError::io(dest, e))?;

        let mut stream = response.bytes_stream();
        let mut bytes_downloaded: u64 = 0;
        progress_cb(DownloadProgress::new(0, total_bytes));

        loop {
            cancel.check()?;
            let next = tokio::time::timeout(self.idle_timeout, stream.next())
                .await
                .map_err(|_| self.timed_out(url, dest))?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|e| ExtensionError::http(url.as_str(), e))?;

            file.write_all(&chunk)
                .await
                .map_err(|e| ExtensionError::io(dest, e))?;

            bytes_downloaded += chunk.len() as u64;
            progress_cb(DownloadProgress::new(bytes_downloaded, total_bytes));
        }

        file.flush().await.map_err(|e| ExtensionError::io(dest, e))?;

        info!(
            "Download complete: {} bytes written to {}",
            bytes_downloaded,
            dest.display()
        );
        Ok(bytes_downloaded)
    }

    fn timed_out(&self, url: &Url, dest: &Path) -> ExtensionError {
        ExtensionError::io(
            dest,
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no data from {} for {:?}", url, self.idle_timeout),
            ),
        )
    }
}
