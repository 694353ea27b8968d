//! Remote catalogs: the data model, hosting rules and retrieval.
//!
//! - `model`: validated Catalog / Extension / Release values
//! - `hosting`: GitHub URL parsing and host allow-lists
//! - `fetch`: HTTP retrieval and raw-content URL resolution

pub mod fetch;
pub mod hosting;
pub mod model;

pub use fetch::{
    fetch_catalog, resolve_raw_content_url, CatalogClient, CATALOG_FILE_NAME, REQUEST_TIMEOUT,
};
pub use hosting::RepositoryPath;
pub use model::{Catalog, Extension, Release};
