//! Installing, updating and removing extensions.
//!
//! - `manager`: the [`ExtensionManager`] façade
//! - `downloader`: streaming HTTP downloads
//! - `extractor`: zip / tar archive extraction
//! - `state`: observable installed-state cells
//! - `cancel`: cooperative cancellation

pub mod cancel;
pub mod downloader;
pub mod extractor;
pub mod manager;
pub mod state;

pub use cancel::Cancellation;
pub use downloader::{DownloadProgress, Downloader};
pub use extractor::{extract_archive, ArchiveFormat};
pub use manager::{ExtensionManager, InstallStep, InstallTarget, UpdateAvailable};
pub use state::ExtensionKey;
