//! Cooperative cancellation for downloads and extraction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ExtensionError, Result};

/// A flag shared between the caller and a running install.
///
/// Checked between download chunks and between archive entries; a chunk or
/// entry already in progress is finished first.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    cancelled: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns [`ExtensionError::Cancelled`] once [`cancel`](Self::cancel)
    /// has been called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ExtensionError::Cancelled)
        } else {
            Ok(())
        }
    }
}
