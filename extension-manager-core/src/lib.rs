//! Extension Manager Core Library
//!
//! This crate provides the core of a package manager for plugin-style
//! extensions of a host application. It includes:
//!
//! - Version parsing and host-compatibility ranges
//! - The catalog / extension / release model with validation
//! - Remote catalog retrieval, including GitHub folder URL resolution
//! - The on-disk extension layout and the persisted catalog registry
//! - A file watcher reporting manually installed files
//! - The install / update / remove orchestrator with progress reporting
//!
//! Logging goes through `tracing`; installing a subscriber is up to the host.

pub mod catalog;
pub mod config;
pub mod error;
pub mod install;
pub mod storage;
pub mod version;
pub mod watcher;

#[cfg(test)]
mod test_support;

pub use config::ManagerConfig;
pub use error::{ExtensionError, Result};

// Re-export catalogs
pub use catalog::{fetch_catalog, resolve_raw_content_url, Catalog, CatalogClient, Extension, Release};

// Re-export storage
pub use storage::{ArtifactKind, ExtensionLayout, InstalledExtension, RegistryEntry};

// Re-export installs
pub use install::{
    Cancellation, ExtensionManager, InstallStep, InstallTarget, UpdateAvailable,
};

pub use version::{Version, VersionRange};
pub use watcher::{FileWatcher, WatchEvent};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
