//! Extension storage: directory layout and the persisted catalog registry.

pub mod paths;
pub mod registry;

pub use paths::{sanitize_name, ArtifactKind, ExtensionLayout, InstalledExtension, CATALOGS_DIR};
pub use registry::{load_registry_from, save_registry_to, Registry, RegistryEntry};
