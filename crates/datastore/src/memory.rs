//! In-process entity store.

use crate::entity::{DeleteResult, Entity, EntityId, Key, Query};
use crate::error::{DatastoreError, DatastoreResult};
use crate::store::EntityStore;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::instrument;

#[derive(Default)]
struct State {
    next_id: i64,
    entities: BTreeMap<(String, EntityId), Entity>,
}

/// Entity store held in memory. Ids are allocated from a counter shared by
/// all kinds; listing order is key order within a kind.
#[derive(Default)]
pub struct MemoryEntityStore {
    state: Mutex<State>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave a half-written entry
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn complete_id(key: &Key) -> DatastoreResult<&EntityId> {
        key.id
            .as_ref()
            .ok_or_else(|| DatastoreError::InvalidKey(format!("incomplete key: {key}")))
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    #[instrument(skip(self), fields(backend = "memory"))]
    async fn run_query(&self, query: &Query) -> DatastoreResult<Vec<Entity>> {
        let state = self.state();
        Ok(state
            .entities
            .values()
            .filter(|e| query.matches(e))
            .cloned()
            .collect())
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn get(&self, key: &Key) -> DatastoreResult<Option<Entity>> {
        let id = Self::complete_id(key)?;
        let state = self.state();
        Ok(state.entities.get(&(key.kind.clone(), id.clone())).cloned())
    }

    #[instrument(skip(self, entity), fields(backend = "memory", key = %entity.key))]
    async fn save(&self, mut entity: Entity) -> DatastoreResult<Key> {
        let mut state = self.state();
        let id = match entity.key.id.clone() {
            Some(id) => id,
            None => {
                state.next_id += 1;
                EntityId::Id(state.next_id)
            }
        };
        if let EntityId::Id(n) = id {
            state.next_id = state.next_id.max(n);
        }
        entity.key.id = Some(id.clone());
        let key = entity.key.clone();
        state.entities.insert((key.kind.clone(), id), entity);
        Ok(key)
    }

    #[instrument(skip(self, entity), fields(backend = "memory", key = %entity.key))]
    async fn update(&self, entity: Entity) -> DatastoreResult<()> {
        let id = Self::complete_id(&entity.key)?.clone();
        let mut state = self.state();
        match state.entities.get_mut(&(entity.key.kind.clone(), id)) {
            Some(existing) => {
                *existing = entity;
                Ok(())
            }
            None => Err(DatastoreError::NotFound(entity.key.to_string())),
        }
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn delete(&self, key: &Key) -> DatastoreResult<DeleteResult> {
        let id = Self::complete_id(key)?;
        let mut state = self.state();
        let index_updates = state
            .entities
            .remove(&(key.kind.clone(), id.clone()))
            .map(|e| e.index_entries())
            .unwrap_or(0);
        Ok(DeleteResult { index_updates })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
