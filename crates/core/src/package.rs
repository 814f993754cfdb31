//! Package names and the object layout under a package namespace.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of the metadata document stored under every package namespace.
pub const PACKAGE_FILE_NAME: &str = "package.json";

/// A package identifier.
///
/// Names are opaque: any non-empty string is accepted and equality is an
/// exact byte match. The name is the partition key for the metadata
/// document, artifact blobs and name index rows.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageName(String);

impl PackageName {
    /// Create a package name, rejecting the empty string.
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(crate::Error::InvalidPackageName(
                "package name must not be empty".to_string(),
            ));
        }
        Ok(Self(name))
    }

    /// Get the name string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Object key of a file inside this package's namespace (`<name>/<file>`).
    pub fn file_path(&self, file_name: &str) -> String {
        format!("{}/{}", self.0, file_name)
    }

    /// Object key of the metadata document.
    pub fn metadata_path(&self) -> String {
        self.file_path(PACKAGE_FILE_NAME)
    }

    /// Object key of the package root.
    pub fn root_path(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PackageName({})", self.0)
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for PackageName {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for PackageName {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<PackageName> for String {
    fn from(name: PackageName) -> Self {
        name.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_name_rejects_empty() {
        assert!(PackageName::new("").is_err());
        assert!("".parse::<PackageName>().is_err());
    }

    #[test]
    fn test_package_name_is_opaque() {
        let scoped = PackageName::new("@scope/pkg").unwrap();
        assert_eq!(scoped.as_str(), "@scope/pkg");
        assert_eq!(scoped.to_string(), "@scope/pkg");
        assert_ne!(scoped, PackageName::new("@Scope/pkg").unwrap());
    }

    #[test]
    fn test_package_paths() {
        let name = PackageName::new("left-pad").unwrap();
        assert_eq!(name.metadata_path(), "left-pad/package.json");
        assert_eq!(name.file_path("left-pad-1.3.0.tgz"), "left-pad/left-pad-1.3.0.tgz");
        assert_eq!(name.root_path(), "left-pad");
    }

    #[test]
    fn test_package_name_serde() {
        let name: PackageName = serde_json::from_str("\"lodash\"").unwrap();
        assert_eq!(name.as_str(), "lodash");
        assert_eq!(serde_json::to_string(&name).unwrap(), "\"lodash\"");
        assert!(serde_json::from_str::<PackageName>("\"\"").is_err());
    }
}
