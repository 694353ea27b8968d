//! Error types shared by every part of the extension manager.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = ExtensionError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ExtensionError {
    /// A version or URL string could not be parsed.
    #[error("Invalid {kind} '{value}': {reason}")]
    InvalidFormat {
        kind: &'static str,
        value: String,
        reason: String,
    },

    /// A catalog document violates a structural or semantic rule.
    #[error("Invalid {object}: field '{field}' {reason}")]
    Validation {
        object: String,
        field: &'static str,
        reason: String,
    },

    #[error("Unsupported URL scheme '{scheme}' in {url}")]
    UnsupportedScheme { scheme: String, url: String },

    #[error("Request to {url} failed with status {status}")]
    Remote { status: u16, url: String },

    #[error("Malformed response from {source_name}: {reason}")]
    MalformedResponse { source_name: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid repository URL '{url}': {reason}")]
    InvalidRepositoryUrl { url: String, reason: String },

    #[error("I/O error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("HTTP request to {url} failed: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The extension directory is unset, missing, or not a directory.
    #[error("Extension directory unavailable{}: {reason}", path.as_ref().map(|p| format!(" ({})", p.display())).unwrap_or_default())]
    RootUnavailable {
        path: Option<PathBuf>,
        reason: String,
    },
}

impl ExtensionError {
    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn validation(
        object: impl Into<String>,
        field: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::Validation {
            object: object.into(),
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn missing(object: impl Into<String>, field: &'static str) -> Self {
        Self::validation(object, field, "is required")
    }

    pub(crate) fn http(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Http {
            url: url.into(),
            source,
        }
    }

    pub(crate) fn malformed(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the operation was interrupted by a cancellation request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
