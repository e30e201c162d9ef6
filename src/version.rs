//! Contract versioning utilities

use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Version of a contract schema in the catalog
///
/// Minor bumps are additive (every version of the same major must stay fully
/// compatible); a major bump starts a new contract line.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractVersion {
    /// Semantic version (e.g., "1.1.0")
    pub version: Version,
}

impl ContractVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            version: Version::new(major, minor, patch),
        }
    }

    /// Create from a version string, with or without a leading 'v'
    pub fn parse(version_str: &str) -> Result<Self, semver::Error> {
        let version_str = version_str.strip_prefix('v').unwrap_or(version_str);
        Ok(Self {
            version: Version::parse(version_str)?,
        })
    }

    /// Get the version string (e.g., "1.1.0")
    pub fn version_string(&self) -> String {
        self.version.to_string()
    }

    /// Same major line, so the two versions must be mutually compatible
    pub fn same_line_as(&self, other: &ContractVersion) -> bool {
        self.version.major == other.version.major
    }
}

impl fmt::Display for ContractVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        let v = ContractVersion::parse("1.2.3").unwrap();
        assert_eq!(v.version_string(), "1.2.3");
        assert_eq!(v.to_string(), "v1.2.3");
    }

    #[test]
    fn test_version_with_v_prefix() {
        let v = ContractVersion::parse("v1.1.0").unwrap();
        assert_eq!(v, ContractVersion::new(1, 1, 0));
        assert!(ContractVersion::parse("one").is_err());
    }

    #[test]
    fn test_version_lines() {
        let v1 = ContractVersion::new(1, 0, 0);
        let v1_1 = ContractVersion::new(1, 1, 0);
        let v2 = ContractVersion::new(2, 0, 0);

        assert!(v1_1.same_line_as(&v1));
        assert!(!v2.same_line_as(&v1));
        assert!(!v2.same_line_as(&v1_1));
        assert!(v1 < v1_1);
    }
}
