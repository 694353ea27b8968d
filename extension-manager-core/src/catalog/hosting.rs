//! Hosting-service (GitHub) URL rules.
//!
//! Catalog documents may only point at a small set of hosts. Extension
//! homepages and main artifacts must live on GitHub; dependencies and
//! javadocs may additionally come from a few well-known Maven hosts.

use url::Url;

use crate::error::{ExtensionError, Result};

/// Host of browsable repository pages.
pub const GITHUB_HOST: &str = "github.com";

/// Default base URL of the GitHub REST API.
pub const GITHUB_API_BASE: &str = "https://api.github.com";

/// Domains allowed for an extension's main artifact.
pub const HOSTING_DOMAINS: &[&str] = &["github.com", "githubusercontent.com"];

/// Domains allowed for dependency and javadoc URLs.
pub const DEPENDENCY_DOMAINS: &[&str] = &[
    "github.com",
    "githubusercontent.com",
    "maven.scijava.org",
    "repo1.maven.org",
    "javadoc.io",
];

/// Returns true if `host` is one of `domains` or a subdomain of one.
pub fn is_allowed_host(host: &str, domains: &[&str]) -> bool {
    let host = host.to_ascii_lowercase();
    domains
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
}

/// Returns true if `url` uses https and its host is in `domains`.
pub fn is_allowed_url(url: &Url, domains: &[&str]) -> bool {
    url.scheme() == "https" && url.host_str().is_some_and(|h| is_allowed_host(h, domains))
}

/// A location inside a GitHub repository, parsed from a browse URL such as
/// `https://github.com/owner/repo/tree/main/catalogs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryPath {
    pub owner: String,
    pub repo: String,
    /// Branch, tag or commit from a `tree/<ref>` or `blob/<ref>` segment.
    pub git_ref: Option<String>,
    /// Path inside the repository, without leading or trailing slashes.
    pub subpath: Option<String>,
}

impl RepositoryPath {
    pub fn parse(url: &Url) -> Result<Self> {
        let invalid = |reason: &str| ExtensionError::InvalidRepositoryUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        if !url.host_str().is_some_and(|h| h.eq_ignore_ascii_case(GITHUB_HOST)) {
            return Err(invalid("host is not github.com"));
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|segment| !segment.is_empty()).collect())
            .unwrap_or_default();

        let (owner, repo, rest) = match segments.as_slice() {
            [owner, repo, rest @ ..] => (*owner, *repo, rest),
            _ => return Err(invalid("expected /<owner>/<repo>[/<path>]")),
        };
        let repo = repo.strip_suffix(".git").unwrap_or(repo);

        let (git_ref, path) = match rest {
            [kind, git_ref, path @ ..] if *kind == "tree" || *kind == "blob" => {
                (Some(git_ref.to_string()), path)
            }
            [kind] if *kind == "tree" || *kind == "blob" => {
                return Err(invalid("missing branch after tree/blob"));
            }
            path => (None, path),
        };

        let subpath = if path.is_empty() {
            None
        } else {
            Some(path.join("/"))
        };

        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            git_ref,
            subpath,
        })
    }

    /// The "list contents" endpoint for this location.
    pub fn contents_api_url(&self, api_base: &str) -> Result<Url> {
        let mut raw = format!(
            "{}/repos/{}/{}/contents",
            api_base.trim_end_matches('/'),
            self.owner,
            self.repo
        );
        if let Some(subpath) = &self.subpath {
            raw.push('/');
            raw.push_str(subpath);
        }

        let mut url = Url::parse(&raw).map_err(|e| ExtensionError::InvalidFormat {
            kind: "URL",
            value: raw.clone(),
            reason: e.to_string(),
        })?;
        if let Some(git_ref) = &self.git_ref {
            url.query_pairs_mut().append_pair("ref", git_ref);
        }
        Ok(url)
    }
}

/// Returns true if `url` is an https GitHub repository page
/// (`https://github.com/<owner>/<repo>...`).
pub fn is_repository_url(url: &Url) -> bool {
    url.scheme() == "https" && RepositoryPath::parse(url).is_ok()
}
