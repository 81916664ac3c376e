//! Version types for migration ordering.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Error types for version operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Invalid version format: {0}")]
    InvalidFormat(String),

    #[error("Invalid version in '{name}': {reason}")]
    InvalidVersion { name: String, reason: String },

    #[error("Version component {0} is out of range")]
    OutOfRange(u64),
}

/// A four-component migration version (major.minor.build.revision).
///
/// Missing components default to zero. Ordering compares major first, then
/// minor, build and revision.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
    pub revision: u32,
}

impl Version {
    /// Create a new Version instance.
    pub fn new(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Four-component form of a single-integer declared version.
    ///
    /// The integer lands in the minor slot so that `(0, n)` orders the same way
    /// the plain integers did.
    pub fn legacy(minor: u32) -> Self {
        Self::new(0, minor, 0, 0)
    }

    /// Like [`Version::legacy`], for integers that may not fit.
    pub fn from_legacy(version: u64) -> Result<Self, VersionError> {
        let minor = u32::try_from(version).map_err(|_| VersionError::OutOfRange(version))?;
        Ok(Self::legacy(minor))
    }

    /// Whether this version has the `(0, n, 0, 0)` shape produced by
    /// [`Version::from_legacy`].
    pub fn is_legacy(&self) -> bool {
        self.major == 0 && self.build == 0 && self.revision == 0
    }

    /// Parse a dotted version string with one to four components
    /// (e.g., "1", "1.2" or "1.2.3.4").
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let parts: Vec<&str> = s.split('.').collect();
        if s.is_empty() || parts.len() > 4 {
            return Err(VersionError::InvalidFormat(s.to_string()));
        }

        let mut numbers = [0u32; 4];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| VersionError::InvalidFormat(s.to_string()))?;
        }

        Ok(Self::new(numbers[0], numbers[1], numbers[2], numbers[3]))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.build.cmp(&other.build))
            .then(self.revision.cmp(&other.revision))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::str::FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
