//! Index of known package names, kept as entity store rows.

use crate::error::{RegistryError, RegistryResult};
use depot_core::PackageName;
use depot_datastore::{DeleteResult, Entity, EntityAdapter, Key, NAME_PROPERTY};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

/// Set of package names stored as `{name}` rows under one entity kind.
///
/// Adding does not deduplicate. Removing deletes every row carrying the
/// name, one at a time.
#[derive(Clone)]
pub struct NameIndex {
    adapter: EntityAdapter,
    kind: String,
}

impl NameIndex {
    pub fn new(adapter: EntityAdapter, kind: impl Into<String>) -> Self {
        Self {
            adapter,
            kind: kind.into(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Insert one row for `name`.
    pub async fn add(&self, name: &PackageName) -> RegistryResult<()> {
        let mut data = Map::new();
        data.insert(NAME_PROPERTY.to_string(), Value::from(name.as_str()));

        match self
            .adapter
            .save_entity(Entity::new(Key::new(&self.kind), data))
            .await
        {
            Ok(key) => {
                debug!(name = %name, key = %key, "added package name");
                Ok(())
            }
            Err(e) => {
                error!(name = %name, error = %e, "failed to add package name");
                Err(RegistryError::internal(e))
            }
        }
    }

    /// All indexed names, in store order.
    pub async fn list(&self) -> RegistryResult<Vec<PackageName>> {
        let entries = self.adapter.get_entities(&self.kind).await.map_err(|e| {
            error!(kind = %self.kind, error = %e, "failed to list package names");
            RegistryError::internal(e)
        })?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| match PackageName::new(entry.name) {
                Ok(name) => Some(name),
                Err(e) => {
                    warn!(id = %entry.id, error = %e, "skipping unusable name index row");
                    None
                }
            })
            .collect())
    }

    /// Delete every row named `name`.
    pub async fn remove(&self, name: &PackageName) -> RegistryResult<()> {
        let entries = self.adapter.get_entities(&self.kind).await.map_err(|e| {
            error!(name = %name, error = %e, "failed to query package names");
            RegistryError::internal(e)
        })?;

        let mut results = Vec::new();
        for entry in entries.into_iter().filter(|e| e.name == name.as_str()) {
            let result = self
                .adapter
                .delete_entity(&self.kind, entry.id.clone())
                .await
                .map_err(|e| {
                    error!(name = %name, id = %entry.id, error = %e, "failed to delete name row");
                    RegistryError::internal(e)
                })?;
            debug!(name = %name, id = %entry.id, index_updates = result.index_updates, "deleted name row");
            results.push(result);
        }

        check_deleted(&results)
    }
}

/// Judge a removal by the first delete result.
pub fn check_deleted(results: &[DeleteResult]) -> RegistryResult<()> {
    match results.first().map(|r| r.index_updates) {
        None | Some(0) => Err(RegistryError::NotFound("not found".to_string())),
        Some(n) if n > 0 => Ok(()),
        Some(n) => {
            error!(index_updates = n, "delete reported a negative index update count");
            Err(RegistryError::InvariantViolation(
                "this should not happen".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(index_updates: i64) -> DeleteResult {
        DeleteResult { index_updates }
    }

    #[test]
    fn test_check_deleted_empty_is_not_found() {
        assert_eq!(
            check_deleted(&[]),
            Err(RegistryError::NotFound("not found".to_string()))
        );
    }

    #[test]
    fn test_check_deleted_zero_updates_is_not_found() {
        assert!(matches!(
            check_deleted(&[result(0)]),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_check_deleted_positive_is_ok() {
        assert_eq!(check_deleted(&[result(2)]), Ok(()));
        assert_eq!(check_deleted(&[result(1), result(0)]), Ok(()));
    }

    #[test]
    fn test_check_deleted_negative_is_invariant_violation() {
        assert_eq!(
            check_deleted(&[result(-1)]),
            Err(RegistryError::InvariantViolation(
                "this should not happen".to_string()
            ))
        );
    }
}
