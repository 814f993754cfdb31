//! Blob storage abstraction and backends for depot.
//!
//! This crate provides:
//! - The `ObjectStore` contract for metadata documents and artifacts
//! - Streaming uploads with checksum validation
//! - Backends: local filesystem and S3-compatible

pub mod backends;
pub mod checksum;
pub mod error;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use traits::{ByteStream, ObjectResponse, ObjectStore, StreamingUpload, WriteOptions};

use depot_core::{ResolvedConfig, StorageBackendConfig};
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &ResolvedConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    match &config.storage {
        StorageBackendConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path, &config.bucket).await?;
            Ok(Arc::new(backend))
        }
        StorageBackendConfig::S3 {
            endpoint,
            region,
            prefix,
            force_path_style,
        } => {
            let backend = S3Backend::new(
                &config.bucket,
                endpoint.clone(),
                region.clone(),
                prefix.clone(),
                config.key_filename.as_deref(),
                *force_path_style,
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use depot_core::StoreConfig;
    use tempfile::tempdir;

    fn resolve(storage: StorageBackendConfig) -> ResolvedConfig {
        let mut config = StoreConfig::new("bucket", "project");
        config.storage = storage;
        StoreConfig::resolve(Some(&config)).unwrap()
    }

    #[tokio::test]
    async fn from_config_filesystem_ok() {
        let temp = tempdir().unwrap();
        let config = resolve(StorageBackendConfig::Filesystem {
            path: temp.path().join("store"),
        });

        let store = from_config(&config).await.unwrap();
        assert_eq!(store.backend_name(), "filesystem");
        store
            .put("hello/package.json", Bytes::from_static(b"{}"), &WriteOptions::default())
            .await
            .unwrap();
        assert!(temp.path().join("store/bucket/hello/package.json").exists());
    }

    #[tokio::test]
    async fn from_config_s3_ok() {
        let config = resolve(StorageBackendConfig::S3 {
            endpoint: Some("minio:9000".to_string()),
            region: Some("us-east-1".to_string()),
            prefix: Some("depot".to_string()),
            force_path_style: true,
        });

        let store = from_config(&config).await.unwrap();
        assert_eq!(store.backend_name(), "s3");
    }
}
