//! Per-package metadata documents stored in the blob store.
//!
//! Each package has one document at `<name>/package.json`, serialized as
//! tab-indented JSON. Reads collapse every failure to not-found. Updates
//! run a read, mutate, transform, write sequence with a single attempt and
//! no concurrency token, so concurrent updates of the same package are
//! last-write-wins.

use crate::error::{RegistryError, RegistryResult};
use bytes::Bytes;
use depot_core::PackageName;
use depot_storage::{ObjectStore, StorageError, WriteOptions};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Clone)]
pub struct MetadataStore {
    blobs: Arc<dyn ObjectStore>,
    options: WriteOptions,
}

impl MetadataStore {
    pub fn new(blobs: Arc<dyn ObjectStore>, options: WriteOptions) -> Self {
        Self { blobs, options }
    }

    /// Save `document` unless one already exists for `name`.
    pub async fn create<T: Serialize + ?Sized>(
        &self,
        name: &PackageName,
        document: &T,
    ) -> RegistryResult<()> {
        let exists = self
            .blobs
            .exists(&name.metadata_path())
            .await
            .map_err(|e| {
                error!(name = %name, error = %e, "failed to check package existence");
                RegistryError::internal(e)
            })?;

        if exists {
            debug!(name = %name, "package already exists");
            return Err(RegistryError::already_exists(name));
        }

        debug!(name = %name, "creating package");
        self.write(name, document, self.options.create_only()).await
    }

    /// Write `document`, replacing any previous one.
    pub async fn save<T: Serialize + ?Sized>(
        &self,
        name: &PackageName,
        document: &T,
    ) -> RegistryResult<()> {
        self.write(name, document, self.options).await
    }

    async fn write<T: Serialize + ?Sized>(
        &self,
        name: &PackageName,
        document: &T,
        options: WriteOptions,
    ) -> RegistryResult<()> {
        let body = encode(document).map_err(|e| {
            error!(name = %name, error = %e, "failed to serialize package");
            RegistryError::internal(e)
        })?;

        debug!(name = %name, size = body.len(), "saving package");
        match self.blobs.put(&name.metadata_path(), body, &options).await {
            Ok(()) => Ok(()),
            Err(StorageError::AlreadyExists(_)) => {
                debug!(name = %name, "package created concurrently");
                Err(RegistryError::already_exists(name))
            }
            Err(e) => {
                error!(name = %name, error = %e, "failed to save package");
                Err(RegistryError::internal(e))
            }
        }
    }

    /// Read and parse the document. Any failure is reported as not-found.
    pub async fn read<T: DeserializeOwned>(&self, name: &PackageName) -> RegistryResult<T> {
        debug!(name = %name, "reading package");
        let body = self
            .blobs
            .get(&name.metadata_path())
            .await
            .map_err(|e| {
                debug!(name = %name, error = %e, "package read failed");
                RegistryError::no_such_package()
            })?;

        serde_json::from_slice(&body).map_err(|e| {
            debug!(name = %name, error = %e, "package document does not parse");
            RegistryError::no_such_package()
        })
    }

    /// Read, mutate, transform and hand the result to `on_write`.
    ///
    /// An error from `update_handler` is returned unchanged and `on_write`
    /// is not called. A panic or error in `transform`, and a panic raised
    /// by `on_write`, are reported as `Internal`. The result of `on_write`
    /// is the result of the update.
    pub async fn update<T, H, X, W, Fut>(
        &self,
        name: &PackageName,
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
        debug!(name = %name, "updating package");
        let mut document: T = self.read(name).await?;

        if let Err(e) = update_handler(&mut document).await {
            debug!(name = %name, error = %e, "update handler rejected the change");
            return Err(e);
        }

        let transformed = match catch_unwind(AssertUnwindSafe(|| transform(document))) {
            Ok(Ok(document)) => document,
            Ok(Err(e)) => {
                error!(name = %name, error = %e, "package transform failed");
                return Err(RegistryError::Internal(e.message().to_string()));
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(name = %name, error = %message, "package transform panicked");
                return Err(RegistryError::Internal(message));
            }
        };

        let writing = catch_unwind(AssertUnwindSafe(|| on_write(name.clone(), transformed)));
        let outcome = match writing {
            Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
            Err(panic) => Err(panic),
        };
        outcome.unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            error!(name = %name, error = %message, "package write panicked");
            Err(RegistryError::Internal(message))
        })
    }

    /// Delete one file under the package namespace.
    pub async fn delete(&self, name: &PackageName, file_name: &str) -> RegistryResult<()> {
        debug!(name = %name, file = file_name, "deleting package file");
        self.blobs
            .delete(&name.file_path(file_name))
            .await
            .map_err(|e| {
                error!(name = %name, file = file_name, error = %e, "failed to delete package file");
                RegistryError::internal(e)
            })
    }

    /// Delete the package root object.
    pub async fn remove_all(&self, name: &PackageName) -> RegistryResult<()> {
        debug!(name = %name, "removing package");
        self.blobs.delete(name.root_path()).await.map_err(|e| {
            error!(name = %name, error = %e, "failed to remove package");
            RegistryError::internal(e)
        })
    }
}

/// Tab-indented JSON.
pub fn encode<T: Serialize + ?Sized>(document: &T) -> serde_json::Result<Bytes> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    document.serialize(&mut serializer)?;
    Ok(Bytes::from(out))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "update panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_uses_tabs() {
        let body = encode(&json!({"name": "a", "versions": {"1.0.0": {}}})).unwrap();
        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            "{\n\t\"name\": \"a\",\n\t\"versions\": {\n\t\t\"1.0.0\": {}\n\t}\n}"
        );
    }

    #[test]
    fn test_panic_message() {
        let panic = catch_unwind(|| {
            panic!("boom");
        })
        .unwrap_err();
        assert_eq!(panic_message(panic.as_ref()), "boom");

        let panic = catch_unwind(|| {
            panic!("{} {}", "formatted", 1);
        })
        .unwrap_err();
        assert_eq!(panic_message(panic.as_ref()), "formatted 1");
    }
}
