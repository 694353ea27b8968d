//! Catalog, extension and release definitions.
//!
//! Values are validated when they are built and are immutable afterwards.
//! Documents are decoded into loosely-typed `Raw*` structs first so that a
//! missing field anywhere in the tree is reported before any semantic rule
//! (URL hosts, uniqueness, version ordering) is checked.

use std::collections::HashSet;

use serde::Deserialize;
use url::Url;

use super::hosting::{self, DEPENDENCY_DOMAINS, HOSTING_DOMAINS};
use crate::error::{ExtensionError, Result};
use crate::version::{Version, VersionRange};

// ============================================================================
// Validated Model
// ============================================================================

/// A named collection of installable extensions.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    name: String,
    description: String,
    extensions: Vec<Extension>,
}

impl Catalog {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        extensions: Vec<Extension>,
    ) -> Result<Self> {
        let name = name.into();
        let mut seen = HashSet::new();
        for extension in &extensions {
            if !seen.insert(extension.name.as_str()) {
                return Err(ExtensionError::validation(
                    format!("catalog '{name}'"),
                    "extensions",
                    format!("contains '{}' more than once", extension.name),
                ));
            }
        }

        Ok(Self {
            name,
            description: description.into(),
            extensions,
        })
    }

    /// Decodes and validates a catalog JSON document.
    pub fn from_json(source_name: &str, body: &str) -> Result<Self> {
        if body.trim().is_empty() {
            return Err(ExtensionError::malformed(source_name, "empty body"));
        }
        let raw: RawCatalog = serde_json::from_str(body)
            .map_err(|e| ExtensionError::malformed(source_name, e.to_string()))?;
        raw.check_required()?;
        raw.into_catalog()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }

    pub fn extension(&self, name: &str) -> Option<&Extension> {
        self.extensions.iter().find(|e| e.name == name)
    }
}

/// An installable extension and its releases.
#[derive(Debug, Clone, PartialEq)]
pub struct Extension {
    name: String,
    description: String,
    author: String,
    homepage: Url,
    releases: Vec<Release>,
}

impl Extension {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        author: impl Into<String>,
        homepage: Url,
        releases: Vec<Release>,
    ) -> Result<Self> {
        let name = name.into();
        if !hosting::is_repository_url(&homepage) {
            return Err(ExtensionError::validation(
                format!("extension '{name}'"),
                "homepage",
                format!("{homepage} is not a GitHub repository URL"),
            ));
        }

        let mut seen = HashSet::new();
        for release in &releases {
            if !seen.insert(&release.version) {
                return Err(ExtensionError::validation(
                    format!("extension '{name}'"),
                    "releases",
                    format!("contains {} more than once", release.name),
                ));
            }
        }

        Ok(Self {
            name,
            description: description.into(),
            author: author.into(),
            homepage,
            releases,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn homepage(&self) -> &Url {
        &self.homepage
    }

    pub fn releases(&self) -> &[Release] {
        &self.releases
    }

    /// Looks up a release by its version string (`v1` finds `v1.0.0`).
    pub fn release(&self, name: &str) -> Option<&Release> {
        let version = Version::parse(name).ok()?;
        self.releases.iter().find(|r| r.version == version)
    }

    /// Releases compatible with `host_version`, newest first.
    pub fn compatible_releases(&self, host_version: &Version) -> Vec<&Release> {
        let mut releases: Vec<&Release> = self
            .releases
            .iter()
            .filter(|r| r.is_compatible(host_version))
            .collect();
        releases.sort_by(|a, b| b.version.cmp(&a.version));
        releases
    }

    /// The newest release compatible with `host_version`.
    pub fn max_compatible_release(&self, host_version: &Version) -> Option<&Release> {
        self.releases
            .iter()
            .filter(|r| r.is_compatible(host_version))
            .max_by(|a, b| a.version.cmp(&b.version))
    }
}

/// One installable version of an extension.
#[derive(Debug, Clone, PartialEq)]
pub struct Release {
    name: String,
    version: Version,
    main_url: Url,
    required_dependency_urls: Vec<Url>,
    optional_dependency_urls: Vec<Url>,
    javadoc_urls: Vec<Url>,
    version_range: VersionRange,
}

impl Release {
    pub fn new(
        name: impl Into<String>,
        main_url: Url,
        required_dependency_urls: Vec<Url>,
        optional_dependency_urls: Vec<Url>,
        javadoc_urls: Vec<Url>,
        version_range: VersionRange,
    ) -> Result<Self> {
        let name = name.into();
        let object = format!("release '{name}'");

        let version = Version::parse(&name)
            .map_err(|e| ExtensionError::validation(&object, "name", e.to_string()))?;

        if !hosting::is_allowed_url(&main_url, HOSTING_DOMAINS) {
            return Err(ExtensionError::validation(
                &object,
                "mainUrl",
                format!("{main_url} must be an https GitHub URL"),
            ));
        }

        for (field, urls) in [
            ("requiredDependencyUrls", &required_dependency_urls),
            ("optionalDependencyUrls", &optional_dependency_urls),
            ("javadocUrls", &javadoc_urls),
        ] {
            if let Some(url) = urls
                .iter()
                .find(|url| !hosting::is_allowed_url(url, DEPENDENCY_DOMAINS))
            {
                return Err(ExtensionError::validation(
                    &object,
                    field,
                    format!(
                        "{url} must use https and one of the hosts {}",
                        DEPENDENCY_DOMAINS.join(", ")
                    ),
                ));
            }
        }

        Ok(Self {
            name,
            version,
            main_url,
            required_dependency_urls,
            optional_dependency_urls,
            javadoc_urls,
            version_range,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn main_url(&self) -> &Url {
        &self.main_url
    }

    pub fn required_dependency_urls(&self) -> &[Url] {
        &self.required_dependency_urls
    }

    pub fn optional_dependency_urls(&self) -> &[Url] {
        &self.optional_dependency_urls
    }

    pub fn javadoc_urls(&self) -> &[Url] {
        &self.javadoc_urls
    }

    pub fn version_range(&self) -> &VersionRange {
        &self.version_range
    }

    pub fn is_compatible(&self, host_version: &Version) -> bool {
        self.version_range.is_compatible(host_version)
    }

    /// Builds a release without host checks so tests can download from a
    /// local server.
    #[cfg(test)]
    pub(crate) fn with_any_host(
        name: &str,
        main_url: Url,
        required_dependency_urls: Vec<Url>,
        optional_dependency_urls: Vec<Url>,
        javadoc_urls: Vec<Url>,
    ) -> Self {
        let version = Version::parse(name).unwrap();
        Self {
            name: name.to_string(),
            version_range: VersionRange::at_least(Version::parse("v0.0.0").unwrap()),
            version,
            main_url,
            required_dependency_urls,
            optional_dependency_urls,
            javadoc_urls,
        }
    }
}

// ============================================================================
// Wire Format
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCatalog {
    name: Option<String>,
    description: Option<String>,
    extensions: Option<Vec<RawExtension>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawExtension {
    name: Option<String>,
    description: Option<String>,
    author: Option<String>,
    homepage: Option<String>,
    releases: Option<Vec<RawRelease>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRelease {
    name: Option<String>,
    main_url: Option<String>,
    required_dependency_urls: Option<Vec<String>>,
    optional_dependency_urls: Option<Vec<String>>,
    javadoc_urls: Option<Vec<String>>,
    version_range: Option<RawVersionRange>,
}

#[derive(Debug, Deserialize)]
struct RawVersionRange {
    min: Option<String>,
    max: Option<String>,
    #[serde(default)]
    excludes: Vec<String>,
}

fn label(kind: &str, name: &Option<String>) -> String {
    match name {
        Some(name) => format!("{kind} '{name}'"),
        None => format!("unnamed {kind}"),
    }
}

fn require<'a, T>(value: &'a Option<T>, object: &str, field: &'static str) -> Result<&'a T> {
    value
        .as_ref()
        .ok_or_else(|| ExtensionError::missing(object, field))
}

fn take<T>(value: Option<T>, object: &str, field: &'static str) -> Result<T> {
    value.ok_or_else(|| ExtensionError::missing(object, field))
}

fn parse_url(value: &str, object: &str, field: &'static str) -> Result<Url> {
    Url::parse(value)
        .map_err(|e| ExtensionError::validation(object, field, format!("'{value}' is not a URL: {e}")))
}

fn parse_urls(values: Vec<String>, object: &str, field: &'static str) -> Result<Vec<Url>> {
    values
        .iter()
        .map(|value| parse_url(value, object, field))
        .collect()
}

fn parse_version(value: &str, object: &str, field: &'static str) -> Result<Version> {
    Version::parse(value).map_err(|e| ExtensionError::validation(object, field, e.to_string()))
}

impl RawCatalog {
    /// Reports the first missing required field anywhere in the document.
    fn check_required(&self) -> Result<()> {
        let object = label("catalog", &self.name);
        require(&self.name, &object, "name")?;
        require(&self.description, &object, "description")?;
        for extension in require(&self.extensions, &object, "extensions")? {
            extension.check_required()?;
        }
        Ok(())
    }

    fn into_catalog(self) -> Result<Catalog> {
        let object = label("catalog", &self.name);
        let extensions = take(self.extensions, &object, "extensions")?
            .into_iter()
            .map(RawExtension::into_extension)
            .collect::<Result<Vec<_>>>()?;
        Catalog::new(
            take(self.name, &object, "name")?,
            take(self.description, &object, "description")?,
            extensions,
        )
    }
}

impl RawExtension {
    fn check_required(&self) -> Result<()> {
        let object = label("extension", &self.name);
        require(&self.name, &object, "name")?;
        require(&self.description, &object, "description")?;
        require(&self.author, &object, "author")?;
        require(&self.homepage, &object, "homepage")?;
        for release in require(&self.releases, &object, "releases")? {
            release.check_required(&object)?;
        }
        Ok(())
    }

    fn into_extension(self) -> Result<Extension> {
        let object = label("extension", &self.name);
        let homepage = parse_url(&take(self.homepage, &object, "homepage")?, &object, "homepage")?;
        let releases = take(self.releases, &object, "releases")?
            .into_iter()
            .map(|release| release.into_release(&object))
            .collect::<Result<Vec<_>>>()?;
        Extension::new(
            take(self.name, &object, "name")?,
            take(self.description, &object, "description")?,
            take(self.author, &object, "author")?,
            homepage,
            releases,
        )
    }
}

impl RawRelease {
    fn check_required(&self, parent: &str) -> Result<()> {
        let object = format!("{} of {parent}", label("release", &self.name));
        require(&self.name, &object, "name")?;
        require(&self.main_url, &object, "mainUrl")?;
        require(&self.required_dependency_urls, &object, "requiredDependencyUrls")?;
        require(&self.optional_dependency_urls, &object, "optionalDependencyUrls")?;
        require(&self.javadoc_urls, &object, "javadocUrls")?;
        let range = require(&self.version_range, &object, "versionRange")?;
        require(&range.min, &object, "versionRange.min")?;
        Ok(())
    }

    fn into_release(self, parent: &str) -> Result<Release> {
        let object = format!("{} of {parent}", label("release", &self.name));
        let main_url = parse_url(&take(self.main_url, &object, "mainUrl")?, &object, "mainUrl")?;
        let required = parse_urls(
            take(self.required_dependency_urls, &object, "requiredDependencyUrls")?,
            &object,
            "requiredDependencyUrls",
        )?;
        let optional = parse_urls(
            take(self.optional_dependency_urls, &object, "optionalDependencyUrls")?,
            &object,
            "optionalDependencyUrls",
        )?;
        let javadocs = parse_urls(
            take(self.javadoc_urls, &object, "javadocUrls")?,
            &object,
            "javadocUrls",
        )?;
        let range = take(self.version_range, &object, "versionRange")?.into_range(&object)?;

        Release::new(
            take(self.name, &object, "name")?,
            main_url,
            required,
            optional,
            javadocs,
            range,
        )
        .map_err(|e| match e {
            // Keep the parent extension in the message.
            ExtensionError::Validation { field, reason, .. } => {
                ExtensionError::validation(&object, field, reason)
            }
            other => other,
        })
    }
}

impl RawVersionRange {
    fn into_range(self, object: &str) -> Result<VersionRange> {
        let min = parse_version(&take(self.min, object, "versionRange.min")?, object, "versionRange.min")?;
        let max = self
            .max
            .map(|max| parse_version(&max, object, "versionRange.max"))
            .transpose()?;
        let excludes = self
            .excludes
            .iter()
            .map(|e| parse_version(e, object, "versionRange.excludes"))
            .collect::<Result<Vec<_>>>()?;

        VersionRange::new(min, max, excludes).map_err(|e| match e {
            ExtensionError::Validation { field, reason, .. } => ExtensionError::Validation {
                object: object.to_string(),
                field: if field == "max" {
                    "versionRange.max"
                } else {
                    "versionRange.excludes"
                },
                reason,
            },
            other => other,
        })
    }
}
