//! Catalog retrieval over HTTP.
//!
//! Every call is a single network round trip; nothing is cached here.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::hosting::{RepositoryPath, GITHUB_API_BASE, GITHUB_HOST};
use super::model::Catalog;
use crate::error::{ExtensionError, Result};
use crate::storage::RegistryEntry;

/// Timeout applied to every outbound request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// File name looked up when a catalog URL points at a repository folder.
pub const CATALOG_FILE_NAME: &str = "catalog.json";

const USER_AGENT: &str = concat!("extension-manager/", env!("CARGO_PKG_VERSION"));

/// Rejects anything but http and https.
pub fn check_scheme(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(ExtensionError::UnsupportedScheme {
            scheme: scheme.to_string(),
            url: url.to_string(),
        }),
    }
}

/// One entry of a GitHub "list contents" response.
#[derive(Debug, Deserialize)]
struct ContentEntry {
    name: Option<String>,
    download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentsResponse {
    Directory(Vec<ContentEntry>),
    File(ContentEntry),
}

impl ContentsResponse {
    fn into_entries(self) -> Vec<ContentEntry> {
        match self {
            Self::Directory(entries) => entries,
            Self::File(entry) => vec![entry],
        }
    }
}

/// HTTP client for catalogs and the GitHub contents API.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    api_base: String,
}

impl CatalogClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| ExtensionError::http("client", e))?;

        Ok(Self {
            http,
            api_base: GITHUB_API_BASE.to_string(),
        })
    }

    /// Points GitHub API calls at another base URL.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Downloads and validates the catalog document at `uri`.
    pub async fn fetch_catalog(&self, uri: &Url) -> Result<Catalog> {
        info!("Fetching catalog from {}", uri);
        let body = self.get_text(uri).await?;
        Catalog::from_json(uri.as_str(), &body)
    }

    /// Finds the download URL of a file in a GitHub repository.
    ///
    /// `hosting_url` may name a folder, in which case its direct children are
    /// listed and the first whose name satisfies `predicate` is returned, or a
    /// single file, which is returned if it satisfies `predicate`.
    pub async fn resolve_raw_content_url<P>(&self, hosting_url: &Url, predicate: P) -> Result<Url>
    where
        P: Fn(&str) -> bool,
    {
        let location = RepositoryPath::parse(hosting_url)?;
        let api_url = location.contents_api_url(&self.api_base)?;
        debug!("Listing {} via {}", hosting_url, api_url);

        let body = self.get_text(&api_url).await?;
        let response: ContentsResponse = serde_json::from_str(&body)
            .map_err(|e| ExtensionError::malformed(api_url.as_str(), e.to_string()))?;

        let download_url = response
            .into_entries()
            .into_iter()
            .filter_map(|entry| Some((entry.name?, entry.download_url?)))
            .find(|(name, _)| predicate(name))
            .map(|(_, download_url)| download_url)
            .ok_or_else(|| {
                ExtensionError::NotFound(format!("no matching file under {hosting_url}"))
            })?;

        Url::parse(&download_url).map_err(|e| ExtensionError::InvalidFormat {
            kind: "URL",
            value: download_url,
            reason: e.to_string(),
        })
    }

    /// Builds a registry entry for a catalog URL entered by the user.
    ///
    /// GitHub page URLs are resolved to the raw `catalog.json` they contain;
    /// other URLs are used as-is. The catalog is fetched once to validate it
    /// and to fill in its name and description.
    pub async fn resolve_catalog_entry(&self, uri: &Url) -> Result<RegistryEntry> {
        check_scheme(uri)?;
        let raw_uri = if uri
            .host_str()
            .is_some_and(|h| h.eq_ignore_ascii_case(GITHUB_HOST))
        {
            self.resolve_raw_content_url(uri, |name| name == CATALOG_FILE_NAME)
                .await?
        } else {
            uri.clone()
        };

        let catalog = self.fetch_catalog(&raw_uri).await?;
        Ok(RegistryEntry {
            name: catalog.name().to_string(),
            description: catalog.description().to_string(),
            uri: uri.clone(),
            raw_uri,
            deletable: true,
        })
    }

    async fn get_text(&self, url: &Url) -> Result<String> {
        check_scheme(url)?;

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ExtensionError::http(url.as_str(), e))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ExtensionError::Remote {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ExtensionError::http(url.as_str(), e))?;
        if body.trim().is_empty() {
            return Err(ExtensionError::malformed(url.as_str(), "empty body"));
        }
        Ok(body)
    }
}

/// Fetches a catalog with a default client.
pub async fn fetch_catalog(uri: &Url) -> Result<Catalog> {
    CatalogClient::new()?.fetch_catalog(uri).await
}

/// Resolves a GitHub URL to a raw download URL with a default client.
pub async fn resolve_raw_content_url<P>(hosting_url: &Url, predicate: P) -> Result<Url>
where
    P: Fn(&str) -> bool,
{
    CatalogClient::new()?
        .resolve_raw_content_url(hosting_url, predicate)
        .await
}
