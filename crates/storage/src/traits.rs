//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use depot_core::{ResolvedConfig, Validation};
use futures::Stream;
use std::fmt;
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Options applied to every write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteOptions {
    /// Checksum the backend verifies for the written content.
    pub validation: Validation,
    /// Use a resumable (multipart) transfer where the backend supports one.
    pub resumable: bool,
    /// Fail the commit with `StorageError::AlreadyExists` instead of
    /// replacing an object that is already stored under the key.
    pub create_only: bool,
}

impl WriteOptions {
    /// The same options, refusing to replace an existing object.
    pub fn create_only(self) -> Self {
        Self {
            create_only: true,
            ..self
        }
    }
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            validation: Validation::Crc32c,
            resumable: true,
            create_only: false,
        }
    }
}

impl From<&ResolvedConfig> for WriteOptions {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            validation: config.validation,
            resumable: config.resumable,
            create_only: false,
        }
    }
}

/// Response of a streaming read: transport status, declared size and body.
pub struct ObjectResponse {
    /// HTTP-style status of the read.
    pub status: u16,
    /// Size declared by the backend before any byte is read.
    pub content_length: Option<u64>,
    /// Object content.
    pub body: ByteStream,
}

impl ObjectResponse {
    /// A successful response.
    pub fn ok(content_length: Option<u64>, body: ByteStream) -> Self {
        Self {
            status: 200,
            content_length,
            body,
        }
    }
}

impl fmt::Debug for ObjectResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Object store addressed by hierarchical keys (`<package>/<file>`).
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Open an object for streaming read.
    ///
    /// Missing objects yield either `StorageError::NotFound` or a response
    /// with status 404, depending on the backend.
    async fn get_stream(&self, key: &str) -> StorageResult<ObjectResponse>;

    /// Put an object atomically, replacing any previous content unless
    /// `options.create_only` is set.
    async fn put(&self, key: &str, data: Bytes, options: &WriteOptions) -> StorageResult<()>;

    /// Start a streaming upload. Nothing is visible under `key` until
    /// [`StreamingUpload::finish`] succeeds. With `options.create_only` the
    /// existence of `key` is checked atomically at that commit.
    async fn put_stream(
        &self,
        key: &str,
        options: &WriteOptions,
    ) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete an object. Deleting a package root also removes everything
    /// stored beneath it.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Get the name of this storage backend.
    ///
    /// Returns a static string identifier for the backend type (e.g., "s3", "filesystem").
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// The default implementation returns Ok(()), suitable for backends that
    /// don't require connectivity verification.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Trait for streaming uploads.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Finish the upload and return the total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload, discarding everything written so far.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}
