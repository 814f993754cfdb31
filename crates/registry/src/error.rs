//! Error types for the package storage engine.

use depot_core::{ConfigError, FILE_EXISTS, NO_SUCH_FILE};
use depot_datastore::DatastoreError;
use depot_storage::StorageError;
use thiserror::Error;

/// Message carried by not-found errors for documents and artifacts.
pub const NO_SUCH_PACKAGE: &str = "no such package available";

/// Errors reported to the registry host.
///
/// Store errors never cross this boundary unwrapped: every one is mapped to
/// one of these kinds with the original message preserved.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),

    #[error("{0}")]
    InvariantViolation(String),

    #[error("{0}")]
    ServiceUnavailable(String),
}

impl RegistryError {
    /// Not-found error for a missing document or artifact.
    pub fn no_such_package() -> Self {
        Self::NotFound(NO_SUCH_PACKAGE.to_string())
    }

    /// Conflict error for an object that already exists.
    pub fn already_exists(name: impl std::fmt::Display) -> Self {
        Self::Conflict(format!("{name} package already exist"))
    }

    /// Error for an operation this backend does not provide.
    pub fn not_implemented(method: &str) -> Self {
        Self::ServiceUnavailable(format!("[{method}] method not implemented"))
    }

    /// HTTP-style status code of this error kind.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::BadRequest(_) => 400,
            Self::Internal(_) | Self::InvariantViolation(_) => 500,
            Self::ServiceUnavailable(_) => 503,
        }
    }

    /// Errno-style code, if this kind carries one.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::NotFound(_) => Some(NO_SUCH_FILE),
            Self::Conflict(_) => Some(FILE_EXISTS),
            _ => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(m)
            | Self::Conflict(m)
            | Self::BadRequest(m)
            | Self::Internal(m)
            | Self::InvariantViolation(m)
            | Self::ServiceUnavailable(m) => m,
        }
    }

    pub(crate) fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }

    pub(crate) fn bad_request(err: impl std::fmt::Display) -> Self {
        Self::BadRequest(err.to_string())
    }
}

/// Result type for registry operations.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Errors raised while building a [`crate::RegistryDatabase`].
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("blob store: {0}")]
    Storage(#[from] StorageError),

    #[error("entity store: {0}")]
    Datastore(#[from] DatastoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_code() {
        let cases = [
            (RegistryError::no_such_package(), 404, Some("ENOENT")),
            (RegistryError::already_exists("lodash"), 409, Some("EEXISTS")),
            (RegistryError::BadRequest("x".into()), 400, None),
            (RegistryError::Internal("x".into()), 500, None),
            (RegistryError::InvariantViolation("x".into()), 500, None),
            (RegistryError::not_implemented("saveToken"), 503, None),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status_code(), status, "{err:?}");
            assert_eq!(err.code(), code, "{err:?}");
        }
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            RegistryError::already_exists("lodash").to_string(),
            "lodash package already exist"
        );
        assert_eq!(
            RegistryError::not_implemented("readTokens").message(),
            "[readTokens] method not implemented"
        );
        assert_eq!(RegistryError::no_such_package().message(), NO_SUCH_PACKAGE);
    }

    #[test]
    fn test_setup_error_keeps_config_message() {
        let err = SetupError::from(ConfigError::MissingBucket);
        assert_eq!(
            err.to_string(),
            "package storage requires a bucket name, please define one."
        );
    }
}
