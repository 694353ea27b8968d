//! Configuration module for the extension manager.

mod settings;

pub use settings::{
    default_extension_dir, ManagerConfig, DEFAULT_HOST_VERSION, DEFAULT_REQUEST_TIMEOUT_SECS,
};
