//! Entity store trait.

use crate::entity::{DeleteResult, Entity, Key, Query};
use crate::error::DatastoreResult;
use async_trait::async_trait;

/// Key-value entity store with kind namespaces and equality queries.
///
/// Stores guarantee per-entity atomicity only.
#[async_trait]
pub trait EntityStore: Send + Sync + 'static {
    /// Run a query, returning matching entities in the store's native order.
    async fn run_query(&self, query: &Query) -> DatastoreResult<Vec<Entity>>;

    /// Get an entity by complete key.
    async fn get(&self, key: &Key) -> DatastoreResult<Option<Entity>>;

    /// Insert or replace an entity. Returns the complete key, allocating an
    /// id when the entity's key is incomplete.
    async fn save(&self, entity: Entity) -> DatastoreResult<Key>;

    /// Replace an existing entity. Fails with `NotFound` if it is absent.
    async fn update(&self, entity: Entity) -> DatastoreResult<()>;

    /// Insert or replace an entity.
    async fn upsert(&self, entity: Entity) -> DatastoreResult<Key> {
        self.save(entity).await
    }

    /// Delete an entity by complete key.
    async fn delete(&self, key: &Key) -> DatastoreResult<DeleteResult>;

    /// Get the name of this store backend.
    fn backend_name(&self) -> &'static str;

    /// Check store connectivity and health.
    async fn health_check(&self) -> DatastoreResult<()> {
        Ok(())
    }
}
