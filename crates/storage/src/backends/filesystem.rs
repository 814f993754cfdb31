//! Local filesystem storage backend.

use crate::checksum::Checksum;
use crate::error::{StorageError, StorageResult};
use crate::traits::{ObjectResponse, ObjectStore, StreamingUpload, WriteOptions};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;
use uuid::Uuid;

/// Default chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Local filesystem object store. The bucket is a directory under the
/// configured root.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a backend storing objects under `<root>/<bucket>`.
    pub async fn new(root: impl AsRef<Path>, bucket: &str) -> StorageResult<Self> {
        if bucket.is_empty() || Path::new(bucket).components().count() != 1 {
            return Err(StorageError::Config(format!(
                "bucket must be a single path component: {bucket:?}"
            )));
        }
        let root = root.as_ref().join(bucket);
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Directory holding this bucket's objects.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path on a blocking thread, since the traversal
    /// checks canonicalize and stat.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Key path validation with path traversal protection.
    ///
    /// Rejects keys that would escape the bucket directory, either
    /// lexically or through a symlink at the path or any existing ancestor.
    fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("empty key".to_string()));
        }
        if key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }
        if Path::new(key)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(format!(
                "contains unsafe path component: {key}"
            )));
        }

        let path = root.join(key);
        let root_canonical = root.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize root: {e}"),
            ))
        })?;

        // Walk from the path itself up to the first existing entry and make
        // sure it resolves inside the root.
        let mut candidate = Some(path.as_path());
        while let Some(current) = candidate {
            match std::fs::symlink_metadata(current) {
                Ok(meta) => {
                    let canonical = current.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!(
                                "symlink target missing or invalid: {key}"
                            ))
                        } else {
                            StorageError::Io(e)
                        }
                    })?;
                    if !canonical.starts_with(&root_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "resolved path escapes storage root: {key}"
                        )));
                    }
                    break;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    candidate = current.parent();
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(path)
    }

    fn map_not_found(key: &str, e: std::io::Error) -> StorageError {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key).await?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_path(key).await?;
        let data = fs::read(&path)
            .await
            .map_err(|e| Self::map_not_found(key, e))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ObjectResponse> {
        let path = self.key_path(key).await?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| Self::map_not_found(key, e))?;
        let metadata = file.metadata().await?;
        if metadata.is_dir() {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(ObjectResponse::ok(Some(metadata.len()), Box::pin(stream)))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes, options: &WriteOptions) -> StorageResult<()> {
        let mut upload = self.put_stream(key, options).await?;
        if let Err(e) = upload.write(data).await {
            let _ = upload.abort().await;
            return Err(e);
        }
        upload.finish().await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn put_stream(
        &self,
        key: &str,
        options: &WriteOptions,
    ) -> StorageResult<Box<dyn StreamingUpload>> {
        let path = self.key_path(key).await?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Unique temp name so concurrent writers to one key never share a file
        let temp_name = format!(".tmp.{}", Uuid::new_v4());
        let temp_path = path.with_file_name(
            path.file_name()
                .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
                .unwrap_or_else(|| temp_name.clone()),
        );
        let file = fs::File::create(&temp_path).await?;

        Ok(Box::new(FilesystemUpload {
            key: key.to_string(),
            file,
            temp_path,
            final_path: path,
            checksum: Checksum::new(options.validation),
            create_only: options.create_only,
            bytes_written: 0,
        }))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        let metadata = fs::symlink_metadata(&path)
            .await
            .map_err(|e| Self::map_not_found(key, e))?;

        if metadata.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        }
        .map_err(|e| Self::map_not_found(key, e))
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}

/// Streaming upload for the filesystem backend.
struct FilesystemUpload {
    key: String,
    file: fs::File,
    temp_path: PathBuf,
    final_path: PathBuf,
    checksum: Checksum,
    create_only: bool,
    bytes_written: u64,
}

impl FilesystemUpload {
    /// Re-read the temp file and compare it with the checksum of the bytes
    /// handed to `write`.
    async fn verify(&self) -> StorageResult<()> {
        if let Checksum::None = self.checksum {
            return Ok(());
        }
        let mut on_disk = Checksum::new(self.checksum.validation());

        let mut file = fs::File::open(&self.temp_path).await?;
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            on_disk.update(&buf[..n]);
        }

        let algorithm = self.checksum.algorithm();
        let expected = self.checksum.clone().finalize();
        let actual = on_disk.finalize();
        if expected != actual {
            return Err(StorageError::HashMismatch {
                algorithm,
                expected: expected.unwrap_or_default(),
                actual: actual.unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Flush, verify and move the temp file into place.
    async fn commit(&mut self) -> StorageResult<()> {
        self.file.sync_all().await?;

        if let Err(e) = self.verify().await {
            tracing::error!(
                path = %self.final_path.display(),
                error = %e,
                "Write validation failed, discarding upload"
            );
            return Err(e);
        }

        if !self.create_only {
            fs::rename(&self.temp_path, &self.final_path).await?;
            return Ok(());
        }

        // link(2) fails when the target exists, rename(2) would replace it
        match fs::hard_link(&self.temp_path, &self.final_path).await {
            Ok(()) => {
                let _ = fs::remove_file(&self.temp_path).await;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StorageError::AlreadyExists(self.key.clone()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[async_trait]
impl StreamingUpload for FilesystemUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.file.write_all(&data).await?;
        self.checksum.update(&data);
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<u64> {
        if let Err(e) = self.commit().await {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(e);
        }
        Ok(self.bytes_written)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
        Ok(())
    }
}
