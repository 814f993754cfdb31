//! Storage handle scoped to one package.

use crate::error::RegistryResult;
use crate::metadata::MetadataStore;
use crate::transfer::{ReadTarball, UploadTarball};
use depot_core::PackageName;
use depot_storage::{ObjectStore, WriteOptions};
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;

/// Metadata and tarball operations for one package.
///
/// Handles share the blob store connection of the database that created
/// them and hold no other state.
#[derive(Clone)]
pub struct PackageStorage {
    name: PackageName,
    blobs: Arc<dyn ObjectStore>,
    options: WriteOptions,
    metadata: MetadataStore,
}

impl PackageStorage {
    pub fn new(name: PackageName, blobs: Arc<dyn ObjectStore>, options: WriteOptions) -> Self {
        let metadata = MetadataStore::new(blobs.clone(), options);
        Self {
            name,
            blobs,
            options,
            metadata,
        }
    }

    pub fn name(&self) -> &PackageName {
        &self.name
    }

    /// Store the first document of the package. Fails with a conflict if
    /// one exists.
    pub async fn create_package<T: Serialize + ?Sized>(&self, document: &T) -> RegistryResult<()> {
        self.metadata.create(&self.name, document).await
    }

    pub async fn save_package<T: Serialize + ?Sized>(&self, document: &T) -> RegistryResult<()> {
        self.metadata.save(&self.name, document).await
    }

    pub async fn read_package<T: DeserializeOwned>(&self) -> RegistryResult<T> {
        self.metadata.read(&self.name).await
    }

    /// See [`MetadataStore::update`].
    pub async fn update_package<T, H, X, W, Fut>(
        &self,
        update_handler: H,
        transform: X,
        on_write: W,
    ) -> RegistryResult<()>
    where
        T: DeserializeOwned + Send,
        H: for<'a> FnOnce(&'a mut T) -> BoxFuture<'a, RegistryResult<()>> + Send,
        X: FnOnce(T) -> RegistryResult<T> + Send,
        W: FnOnce(PackageName, T) -> Fut + Send,
        Fut: Future<Output = RegistryResult<()>> + Send,
    {
        self.metadata
            .update(&self.name, update_handler, transform, on_write)
            .await
    }

    /// Delete one file (a tarball or the document) of the package.
    pub async fn delete_package(&self, file_name: &str) -> RegistryResult<()> {
        self.metadata.delete(&self.name, file_name).await
    }

    pub async fn remove_package(&self) -> RegistryResult<()> {
        self.metadata.remove_all(&self.name).await
    }

    /// Start uploading `file_name`. Must be called within a Tokio runtime.
    pub fn write_tarball(&self, file_name: &str) -> UploadTarball {
        UploadTarball::start(
            self.blobs.clone(),
            self.options,
            self.name.clone(),
            file_name.to_string(),
        )
    }

    /// Start downloading `file_name`. Must be called within a Tokio runtime.
    pub fn read_tarball(&self, file_name: &str) -> ReadTarball {
        ReadTarball::start(self.blobs.clone(), self.name.clone(), file_name.to_string())
    }
}
