//! Thin adapter over an [`EntityStore`].
//!
//! Translates the registry's vocabulary (kinds, ids, name rows) into store
//! calls. It adds no retries and does not interpret errors: whatever the
//! store reports is returned unchanged.

use crate::entity::{DeleteResult, Entity, EntityId, Key, NameIndexEntry, Query};
use crate::error::DatastoreResult;
use crate::store::EntityStore;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Property holding the package name on name index rows.
pub const NAME_PROPERTY: &str = "name";

#[derive(Clone)]
pub struct EntityAdapter {
    store: Arc<dyn EntityStore>,
}

impl EntityAdapter {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Query over `kind`, optionally restricted to rows named `name`.
    pub fn create_query(&self, kind: &str, name_filter: Option<&str>) -> Query {
        let query = Query::new(kind);
        match name_filter {
            Some(name) => query.filter(NAME_PROPERTY, name),
            None => query,
        }
    }

    pub async fn run_query(&self, query: &Query) -> DatastoreResult<Vec<Entity>> {
        self.store.run_query(query).await
    }

    pub async fn get_entity(&self, key: &Key) -> DatastoreResult<Option<Entity>> {
        self.store.get(key).await
    }

    pub async fn save_entity(&self, entity: Entity) -> DatastoreResult<Key> {
        self.store.save(entity).await
    }

    /// Replace the data of an existing entity.
    pub async fn update_entity(
        &self,
        key: Key,
        exclude_from_indexes: Vec<String>,
        data: Map<String, Value>,
    ) -> DatastoreResult<()> {
        self.store
            .update(Entity {
                key,
                data,
                exclude_from_indexes,
            })
            .await
    }

    pub async fn upsert_entity(&self, entity: Entity) -> DatastoreResult<Key> {
        self.store.upsert(entity).await
    }

    pub async fn delete_entity(&self, kind: &str, id: EntityId) -> DatastoreResult<DeleteResult> {
        let key = Key {
            kind: kind.to_string(),
            id: Some(id),
        };
        self.store.delete(&key).await
    }

    /// All rows of `kind` that carry a string `name`, projected to
    /// `{id, name}`, in store order.
    pub async fn get_entities(&self, kind: &str) -> DatastoreResult<Vec<NameIndexEntry>> {
        let query = self.create_query(kind, None);
        let rows = self.store.run_query(&query).await?;
        Ok(rows
            .into_iter()
            .filter_map(|entity| {
                let name = entity.get(NAME_PROPERTY)?.as_str()?.to_string();
                let id = entity.key.id?;
                Some(NameIndexEntry { id, name })
            })
            .collect())
    }
}
