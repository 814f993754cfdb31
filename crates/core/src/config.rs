//! Configuration types shared across crates.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Entity kind used for name index rows when none is configured.
pub const DEFAULT_KIND: &str = "VerdaccioDataStore";

/// Environment variable consulted when `project_id` is not configured.
pub const PROJECT_ID_ENV: &str = "DEPOT_PROJECT_ID";

/// Environment variable consulted when `key_filename` is not configured.
pub const KEY_FILE_ENV: &str = "DEPOT_KEY_FILE";

/// Content validation applied to blob writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validation {
    /// CRC32C checksum (default).
    #[default]
    Crc32c,
    /// MD5 digest.
    Md5,
    /// No validation.
    #[serde(alias = "false")]
    None,
}

impl Validation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crc32c => "crc32c",
            Self::Md5 => "md5",
            Self::None => "none",
        }
    }
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Validation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "crc32c" => Ok(Self::Crc32c),
            "md5" => Ok(Self::Md5),
            "none" | "false" => Ok(Self::None),
            other => Err(ConfigError::Invalid(format!(
                "unknown validation mode: {other} (expected crc32c, md5 or none)"
            ))),
        }
    }
}

/// Blob store backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageBackendConfig {
    /// Local filesystem storage. The bucket is a directory under `path`.
    Filesystem {
        /// Root directory for storage.
        #[serde(default = "default_blob_root")]
        path: PathBuf,
    },
    /// S3-compatible storage. The bucket is the S3 bucket name.
    S3 {
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`). Required for MinIO.
        #[serde(default)]
        force_path_style: bool,
    },
}

fn default_blob_root() -> PathBuf {
    PathBuf::from("./data/blobs")
}

impl Default for StorageBackendConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: default_blob_root(),
        }
    }
}

/// Entity store backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DatastoreConfig {
    /// In-process store. Nothing survives a restart.
    Memory,
    /// SQLite database file.
    Sqlite {
        /// Database file path. Defaults to `./data/<project_id>.db`.
        #[serde(default)]
        path: Option<PathBuf>,
    },
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self::Sqlite { path: None }
    }
}

/// Package storage configuration as written by the operator.
///
/// Every field is optional at this level so that missing values can be
/// reported with a specific message by [`StoreConfig::resolve`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Bucket holding metadata documents and artifacts (required).
    pub bucket: Option<String>,
    /// Project identifier (required, falls back to `DEPOT_PROJECT_ID`).
    #[serde(alias = "projectId")]
    pub project_id: Option<String>,
    /// Credentials file (falls back to `DEPOT_KEY_FILE`).
    #[serde(alias = "keyFilename")]
    pub key_filename: Option<PathBuf>,
    /// Entity kind of the name index rows.
    pub kind: Option<String>,
    /// Write validation mode.
    pub validation: Option<Validation>,
    /// Resumable uploads. Enabled unless explicitly set to false.
    pub resumable: Option<bool>,
    /// Blob store backend.
    #[serde(default)]
    pub storage: StorageBackendConfig,
    /// Entity store backend.
    #[serde(default)]
    pub datastore: DatastoreConfig,
}

/// Configuration with every default applied and every required value present.
#[derive(Clone, Debug)]
pub struct ResolvedConfig {
    pub bucket: String,
    pub project_id: String,
    pub key_filename: Option<PathBuf>,
    pub kind: String,
    pub validation: Validation,
    pub resumable: bool,
    pub storage: StorageBackendConfig,
    pub datastore: DatastoreConfig,
}

impl StoreConfig {
    /// Create a configuration with the two required values set.
    pub fn new(bucket: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            bucket: Some(bucket.into()),
            project_id: Some(project_id.into()),
            ..Self::default()
        }
    }

    /// Validate the configuration and apply defaults, reading fallbacks from
    /// the process environment.
    pub fn resolve(config: Option<&StoreConfig>) -> Result<ResolvedConfig, ConfigError> {
        Self::resolve_with_env(config, |var| std::env::var(var).ok())
    }

    /// Validate the configuration and apply defaults, reading fallbacks
    /// through `env`.
    ///
    /// Checks run in a fixed order: missing config, missing bucket, missing
    /// project id.
    pub fn resolve_with_env<F>(
        config: Option<&StoreConfig>,
        env: F,
    ) -> Result<ResolvedConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = config.ok_or(ConfigError::MissingConfig)?;

        let bucket = non_empty(config.bucket.clone()).ok_or(ConfigError::MissingBucket)?;
        let project_id = non_empty(config.project_id.clone())
            .or_else(|| non_empty(env(PROJECT_ID_ENV)))
            .ok_or(ConfigError::MissingProjectId)?;

        let key_filename = config
            .key_filename
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .or_else(|| non_empty(env(KEY_FILE_ENV)).map(PathBuf::from));

        let kind = non_empty(config.kind.clone()).unwrap_or_else(|| DEFAULT_KIND.to_string());

        if bucket.contains("..") || bucket.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "bucket name must be a plain name: {bucket}"
            )));
        }

        Ok(ResolvedConfig {
            bucket,
            project_id,
            key_filename,
            kind,
            validation: config.validation.unwrap_or_default(),
            resumable: config.resumable.unwrap_or(true),
            storage: config.storage.clone(),
            datastore: config.datastore.clone(),
        })
    }
}

impl ResolvedConfig {
    /// SQLite database path for the entity store, if SQLite is configured.
    pub fn sqlite_path(&self) -> Option<PathBuf> {
        match &self.datastore {
            DatastoreConfig::Sqlite { path: Some(path) } => Some(path.clone()),
            DatastoreConfig::Sqlite { path: None } => {
                Some(PathBuf::from(format!("./data/{}.db", self.project_id)))
            }
            DatastoreConfig::Memory => None,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
