//! Core types shared across the depot crates.
//!
//! This crate defines:
//! - Package names and the object layout under a package namespace
//! - Store configuration and construction-time validation

pub mod config;
pub mod error;
pub mod package;

pub use config::{
    DEFAULT_KIND, DatastoreConfig, ResolvedConfig, StorageBackendConfig, StoreConfig, Validation,
};
pub use error::{ConfigError, Error, Result};
pub use package::{PACKAGE_FILE_NAME, PackageName};

/// Entity kind holding the registry-wide secret.
pub const SECRET_KIND: &str = "Secret";

/// Entity name of the registry-wide secret.
pub const SECRET_KEY_NAME: &str = "secret";

/// Errno-style code attached to not-found errors.
pub const NO_SUCH_FILE: &str = "ENOENT";

/// Errno-style code attached to conflict errors.
pub const FILE_EXISTS: &str = "EEXISTS";
