//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid package name: {0}")]
    InvalidPackageName(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Construction-time configuration errors.
///
/// A backend is never built from a configuration that fails these checks.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("package storage missing config. Add a `store` section to your config file")]
    MissingConfig,

    #[error("package storage requires a bucket name, please define one.")]
    MissingBucket,

    #[error("package storage requires a project id.")]
    MissingProjectId,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
