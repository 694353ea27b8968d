//! Host-version compatibility ranges declared by releases.

use std::collections::HashSet;

use super::number::Version;
use crate::error::{ExtensionError, Result};

/// The host versions a release declares itself compatible with.
///
/// Both bounds are inclusive and `max` is optional. `excludes` removes
/// individual versions from the interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    min: Version,
    max: Option<Version>,
    excludes: HashSet<Version>,
}

impl VersionRange {
    /// Builds a range, checking that `min <= max` and that every excluded
    /// version lies inside the interval.
    pub fn new(
        min: Version,
        max: Option<Version>,
        excludes: impl IntoIterator<Item = Version>,
    ) -> Result<Self> {
        if let Some(max) = &max {
            if min > *max {
                return Err(ExtensionError::validation(
                    "version range",
                    "max",
                    format!("{max} is lower than min {min}"),
                ));
            }
        }

        let excludes: HashSet<Version> = excludes.into_iter().collect();
        for excluded in &excludes {
            let above_min = *excluded >= min;
            let below_max = max.as_ref().map_or(true, |max| excluded <= max);
            if !(above_min && below_max) {
                return Err(ExtensionError::validation(
                    "version range",
                    "excludes",
                    format!("{excluded} lies outside the range"),
                ));
            }
        }

        Ok(Self { min, max, excludes })
    }

    /// A range with only a lower bound.
    pub fn at_least(min: Version) -> Self {
        Self {
            min,
            max: None,
            excludes: HashSet::new(),
        }
    }

    pub fn min(&self) -> &Version {
        &self.min
    }

    pub fn max(&self) -> Option<&Version> {
        self.max.as_ref()
    }

    pub fn excludes(&self) -> &HashSet<Version> {
        &self.excludes
    }

    /// Returns true if `version` is at least `min`, at most `max` (when set)
    /// and not explicitly excluded.
    pub fn is_compatible(&self, version: &Version) -> bool {
        *version >= self.min
            && self.max.as_ref().map_or(true, |max| version <= max)
            && !self.excludes.contains(version)
    }
}
