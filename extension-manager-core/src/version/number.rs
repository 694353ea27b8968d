//! Release versions of the form `v<major>[.<minor>[.<patch>]][-rc<n>]`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ExtensionError, Result};

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^v(\d+)(?:\.(\d+)(?:\.(\d+))?)?(?:-rc(\d+))?$")
            .expect("version pattern is a valid regex")
    })
}

/// A parsed release version.
///
/// Minor and patch components may be omitted when writing a version. They
/// compare as zero, so `v1` equals `v1.0.0`, but the written form is kept so
/// that [`fmt::Display`] round-trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    major: u32,
    minor: Option<u32>,
    patch: Option<u32>,
    release_candidate: Option<u32>,
}

impl Version {
    /// Parses a version string such as `v0.5.1` or `v1.0.0-rc2`.
    pub fn parse(value: &str) -> Result<Self> {
        let captures = version_pattern()
            .captures(value.trim())
            .ok_or_else(|| invalid(value, "expected v<major>[.<minor>[.<patch>]][-rc<n>]"))?;

        let component = |index: usize| -> Result<Option<u32>> {
            captures
                .get(index)
                .map(|m| {
                    m.as_str()
                        .parse::<u32>()
                        .map_err(|e| invalid(value, &format!("component '{}': {e}", m.as_str())))
                })
                .transpose()
        };

        let major = component(1)?.ok_or_else(|| invalid(value, "missing major component"))?;

        Ok(Self {
            major,
            minor: component(2)?,
            patch: component(3)?,
            release_candidate: component(4)?,
        })
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor.unwrap_or(0)
    }

    pub fn patch(&self) -> u32 {
        self.patch.unwrap_or(0)
    }

    pub fn release_candidate(&self) -> Option<u32> {
        self.release_candidate
    }

    pub fn is_release_candidate(&self) -> bool {
        self.release_candidate.is_some()
    }

    /// Ordering key. A final release sorts after every release candidate.
    fn key(&self) -> (u32, u32, u32, u32, u32) {
        let (is_final, rc) = match self.release_candidate {
            Some(rc) => (0, rc),
            None => (1, 0),
        };
        (self.major, self.minor(), self.patch(), is_final, rc)
    }
}

fn invalid(value: &str, reason: &str) -> ExtensionError {
    ExtensionError::InvalidFormat {
        kind: "version",
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.major)?;
        if let Some(minor) = self.minor {
            write!(f, ".{minor}")?;
            if let Some(patch) = self.patch {
                write!(f, ".{patch}")?;
            }
        }
        if let Some(rc) = self.release_candidate {
            write!(f, "-rc{rc}")?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = ExtensionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = ExtensionError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.to_string()
    }
}
