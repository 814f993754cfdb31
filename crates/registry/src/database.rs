//! Registry-wide storage object.

use crate::error::{RegistryError, RegistryResult, SetupError};
use crate::name_index::NameIndex;
use crate::package::PackageStorage;
use depot_core::{PackageName, ResolvedConfig, SECRET_KEY_NAME, SECRET_KIND, StoreConfig};
use depot_datastore::{Entity, EntityAdapter, EntityStore, Key};
use depot_storage::{ObjectStore, WriteOptions};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Property holding the secret on the secret entity.
const SECRET_PROPERTY: &str = "secret";

/// Entry point of the storage engine.
///
/// Owns the blob store and entity store connections shared by every
/// [`PackageStorage`] handle it creates, and the package name index.
pub struct RegistryDatabase {
    config: ResolvedConfig,
    blobs: Arc<dyn ObjectStore>,
    entities: EntityAdapter,
    names: NameIndex,
}

impl RegistryDatabase {
    /// Validate `config` and wire the given stores.
    pub fn new(
        config: Option<&StoreConfig>,
        blobs: Arc<dyn ObjectStore>,
        entities: Arc<dyn EntityStore>,
    ) -> Result<Self, SetupError> {
        let config = StoreConfig::resolve(config)?;
        Ok(Self::with_resolved(config, blobs, entities))
    }

    /// Validate `config` and connect the stores it selects.
    pub async fn from_config(config: Option<&StoreConfig>) -> Result<Self, SetupError> {
        let config = StoreConfig::resolve(config)?;
        let blobs = depot_storage::from_config(&config).await?;
        let entities = depot_datastore::from_config(&config).await?;
        Ok(Self::with_resolved(config, blobs, entities))
    }

    fn with_resolved(
        config: ResolvedConfig,
        blobs: Arc<dyn ObjectStore>,
        entities: Arc<dyn EntityStore>,
    ) -> Self {
        info!(
            bucket = %config.bucket,
            project_id = %config.project_id,
            kind = %config.kind,
            validation = %config.validation,
            resumable = config.resumable,
            blobs = blobs.backend_name(),
            entities = entities.backend_name(),
            "package storage configured"
        );
        let entities = EntityAdapter::new(entities);
        let names = NameIndex::new(entities.clone(), config.kind.clone());
        Self {
            config,
            blobs,
            entities,
            names,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Record `name` in the name index.
    pub async fn add(&self, name: &PackageName) -> RegistryResult<()> {
        self.names.add(name).await
    }

    /// Drop every name index row for `name`.
    pub async fn remove(&self, name: &PackageName) -> RegistryResult<()> {
        self.names.remove(name).await
    }

    /// All indexed package names, in store order.
    pub async fn get(&self) -> RegistryResult<Vec<PackageName>> {
        self.names.list().await
    }

    pub fn get_package_storage(&self, name: PackageName) -> PackageStorage {
        PackageStorage::new(name, self.blobs.clone(), WriteOptions::from(&self.config))
    }

    /// Full-text search is not provided; ends immediately without calling
    /// `on_package`.
    pub async fn search<F, V>(&self, _on_package: F, _validate: V) -> RegistryResult<()>
    where
        F: FnMut(&PackageName) + Send,
        V: Fn(&PackageName) -> bool + Send,
    {
        debug!("search is not supported, nothing to report");
        Ok(())
    }

    /// The registry-wide secret, if one was set.
    pub async fn get_secret(&self) -> RegistryResult<Option<String>> {
        let entity = self
            .entities
            .get_entity(&secret_key())
            .await
            .map_err(|e| {
                error!(error = %e, "failed to read secret");
                RegistryError::internal(e)
            })?;

        Ok(entity
            .as_ref()
            .and_then(|e| e.get(SECRET_PROPERTY))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    pub async fn set_secret(&self, secret: &str) -> RegistryResult<()> {
        let mut data = Map::new();
        data.insert(SECRET_PROPERTY.to_string(), Value::from(secret));

        self.entities
            .upsert_entity(Entity::new(secret_key(), data))
            .await
            .map_err(|e| {
                error!(error = %e, "failed to store secret");
                RegistryError::internal(e)
            })?;
        debug!("secret stored");
        Ok(())
    }

    pub async fn save_token(&self, _token: &Value) -> RegistryResult<()> {
        Err(RegistryError::not_implemented("saveToken"))
    }

    pub async fn delete_token(&self, _user: &str, _token_key: &str) -> RegistryResult<()> {
        Err(RegistryError::not_implemented("deleteToken"))
    }

    pub async fn read_tokens(&self, _user: &str) -> RegistryResult<Vec<Value>> {
        Err(RegistryError::not_implemented("readTokens"))
    }

    /// Nothing is cached locally, so there is nothing to flush.
    pub async fn sync(&self) -> RegistryResult<()> {
        Ok(())
    }

    /// Check both stores.
    pub async fn health_check(&self) -> RegistryResult<()> {
        self.blobs.health_check().await.map_err(|e| {
            error!(backend = self.blobs.backend_name(), error = %e, "blob store unhealthy");
            RegistryError::ServiceUnavailable(e.to_string())
        })?;
        self.entities.store().health_check().await.map_err(|e| {
            error!(backend = self.entities.store().backend_name(), error = %e, "entity store unhealthy");
            RegistryError::ServiceUnavailable(e.to_string())
        })
    }
}

fn secret_key() -> Key {
    Key::name(SECRET_KIND, SECRET_KEY_NAME)
}
