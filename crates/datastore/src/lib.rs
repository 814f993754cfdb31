//! Entity store abstraction and implementations for depot.
//!
//! This crate provides:
//! - Keys, entities, equality queries and delete results
//! - The `EntityStore` contract and the `EntityAdapter` wrapper
//! - Stores: in-process memory and SQLite

pub mod adapter;
pub mod entity;
pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use adapter::{EntityAdapter, NAME_PROPERTY};
pub use entity::{DeleteResult, Entity, EntityId, Key, NameIndexEntry, Query};
pub use error::{DatastoreError, DatastoreResult};
pub use memory::MemoryEntityStore;
pub use sqlite::SqliteEntityStore;
pub use store::EntityStore;

use depot_core::{DatastoreConfig, ResolvedConfig};
use std::sync::Arc;

/// Create an entity store from configuration.
pub async fn from_config(config: &ResolvedConfig) -> DatastoreResult<Arc<dyn EntityStore>> {
    match &config.datastore {
        DatastoreConfig::Memory => {
            tracing::warn!("Using in-memory entity store, the name index will not survive a restart");
            Ok(Arc::new(MemoryEntityStore::new()))
        }
        DatastoreConfig::Sqlite { .. } => {
            let path = config
                .sqlite_path()
                .ok_or_else(|| DatastoreError::Config("sqlite path unavailable".to_string()))?;
            let store = SqliteEntityStore::new(&path).await?;
            Ok(Arc::new(store))
        }
    }
}
