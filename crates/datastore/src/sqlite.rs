//! SQLite-backed entity store.

use crate::entity::{DeleteResult, Entity, EntityId, Key, Query};
use crate::error::{DatastoreError, DatastoreResult};
use crate::store::EntityStore;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{FromRow, Pool, QueryBuilder, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

/// Raw `entities` row.
#[derive(Debug, Clone, FromRow)]
struct EntityRow {
    row_id: i64,
    kind: String,
    key_name: Option<String>,
    data: String,
    unindexed: String,
}

impl EntityRow {
    fn into_entity(self) -> DatastoreResult<Entity> {
        let id = match self.key_name {
            Some(name) => EntityId::Name(name),
            None => EntityId::Id(self.row_id),
        };
        let data: Map<String, Value> = serde_json::from_str(&self.data)?;
        let exclude_from_indexes: Vec<String> = serde_json::from_str(&self.unindexed)?;
        Ok(Entity {
            key: Key {
                kind: self.kind,
                id: Some(id),
            },
            data,
            exclude_from_indexes,
        })
    }
}

/// Entity store persisted in one SQLite table.
///
/// Numeric ids are the table's rowid; named keys are unique per kind.
pub struct SqliteEntityStore {
    pool: Pool<Sqlite>,
}

impl SqliteEntityStore {
    /// Open (creating if needed) the database at `path`.
    pub async fn new(path: impl AsRef<Path>) -> DatastoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatastoreError::Config(format!(
                    "failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        Self::connect(opts).await
    }

    /// Open a private in-memory database.
    pub async fn in_memory() -> DatastoreResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        Self::connect(opts).await
    }

    async fn connect(opts: SqliteConnectOptions) -> DatastoreResult<Self> {
        // One connection: SQLite serializes writers anyway, and an in-memory
        // database exists per connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create the schema if it does not exist.
    pub async fn migrate(&self) -> DatastoreResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    fn complete_id(key: &Key) -> DatastoreResult<&EntityId> {
        key.id
            .as_ref()
            .ok_or_else(|| DatastoreError::InvalidKey(format!("incomplete key: {key}")))
    }

    fn encode(entity: &Entity) -> DatastoreResult<(String, String)> {
        Ok((
            serde_json::to_string(&entity.data)?,
            serde_json::to_string(&entity.exclude_from_indexes)?,
        ))
    }

    /// Push `WHERE kind = ? AND <id column> = ?` for a complete key.
    fn push_key_filter(builder: &mut QueryBuilder<'_, Sqlite>, key: &Key, id: &EntityId) {
        builder.push(" WHERE kind = ").push_bind(key.kind.clone());
        match id {
            EntityId::Id(n) => {
                builder
                    .push(" AND key_name IS NULL AND row_id = ")
                    .push_bind(*n);
            }
            EntityId::Name(name) => {
                builder.push(" AND key_name = ").push_bind(name.clone());
            }
        }
    }
}

/// JSON path of a top-level property, quoted so any property name is valid.
fn property_path(property: &str) -> String {
    format!("$.\"{}\"", property.replace('"', "\\\""))
}

/// Push a `json_extract(data, path) = value` comparison.
fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, property: &str, value: &Value) {
    builder
        .push(" AND json_extract(data, ")
        .push_bind(property_path(property))
        .push(")");
    match value {
        Value::Null => {
            builder.push(" IS NULL");
        }
        Value::Bool(b) => {
            builder.push(" = ").push_bind(i64::from(*b));
        }
        Value::Number(n) => match n.as_i64() {
            Some(i) => {
                builder.push(" = ").push_bind(i);
            }
            None => {
                builder.push(" = ").push_bind(n.as_f64().unwrap_or_default());
            }
        },
        Value::String(s) => {
            builder.push(" = ").push_bind(s.clone());
        }
        Value::Array(_) | Value::Object(_) => {
            builder
                .push(" = json(")
                .push_bind(value.to_string())
                .push(")");
        }
    }
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    #[instrument(skip(self), fields(backend = "sqlite"))]
    async fn run_query(&self, query: &Query) -> DatastoreResult<Vec<Entity>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT row_id, kind, key_name, data, unindexed FROM entities WHERE kind = ",
        );
        builder.push_bind(query.kind.clone());
        for (property, value) in &query.filters {
            push_filter(&mut builder, property, value);
        }
        builder.push(" ORDER BY row_id");

        let rows: Vec<EntityRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(EntityRow::into_entity).collect()
    }

    #[instrument(skip(self), fields(backend = "sqlite"))]
    async fn get(&self, key: &Key) -> DatastoreResult<Option<Entity>> {
        let id = Self::complete_id(key)?;
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT row_id, kind, key_name, data, unindexed FROM entities",
        );
        Self::push_key_filter(&mut builder, key, id);

        let row: Option<EntityRow> = builder.build_query_as().fetch_optional(&self.pool).await?;
        row.map(EntityRow::into_entity).transpose()
    }

    #[instrument(skip(self, entity), fields(backend = "sqlite", key = %entity.key))]
    async fn save(&self, entity: Entity) -> DatastoreResult<Key> {
        let (data, unindexed) = Self::encode(&entity)?;
        let kind = entity.key.kind.clone();

        match &entity.key.id {
            None => {
                let result = sqlx::query(
                    "INSERT INTO entities (kind, key_name, data, unindexed) VALUES (?, NULL, ?, ?)",
                )
                .bind(&kind)
                .bind(&data)
                .bind(&unindexed)
                .execute(&self.pool)
                .await?;
                Ok(Key::id(kind, result.last_insert_rowid()))
            }
            Some(EntityId::Id(n)) => {
                let result = sqlx::query(
                    "INSERT INTO entities (row_id, kind, key_name, data, unindexed) VALUES (?, ?, NULL, ?, ?) \
                     ON CONFLICT(row_id) DO UPDATE SET data = excluded.data, unindexed = excluded.unindexed \
                     WHERE entities.kind = excluded.kind AND entities.key_name IS NULL",
                )
                .bind(n)
                .bind(&kind)
                .bind(&data)
                .bind(&unindexed)
                .execute(&self.pool)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(DatastoreError::InvalidKey(format!(
                        "id {n} is already used by another entity"
                    )));
                }
                Ok(entity.key)
            }
            Some(EntityId::Name(name)) => {
                sqlx::query(
                    "INSERT INTO entities (kind, key_name, data, unindexed) VALUES (?, ?, ?, ?) \
                     ON CONFLICT(kind, key_name) DO UPDATE SET data = excluded.data, unindexed = excluded.unindexed",
                )
                .bind(&kind)
                .bind(name)
                .bind(&data)
                .bind(&unindexed)
                .execute(&self.pool)
                .await?;
                Ok(entity.key)
            }
        }
    }

    #[instrument(skip(self, entity), fields(backend = "sqlite", key = %entity.key))]
    async fn update(&self, entity: Entity) -> DatastoreResult<()> {
        let id = Self::complete_id(&entity.key)?;
        let (data, unindexed) = Self::encode(&entity)?;

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE entities SET data = ");
        builder
            .push_bind(data)
            .push(", unindexed = ")
            .push_bind(unindexed);
        Self::push_key_filter(&mut builder, &entity.key, id);

        let result = builder.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(DatastoreError::NotFound(entity.key.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "sqlite"))]
    async fn delete(&self, key: &Key) -> DatastoreResult<DeleteResult> {
        let id = Self::complete_id(key)?;
        let mut tx = self.pool.begin().await?;

        let mut select = QueryBuilder::<Sqlite>::new(
            "SELECT row_id, kind, key_name, data, unindexed FROM entities",
        );
        Self::push_key_filter(&mut select, key, id);
        let existing: Option<EntityRow> = select.build_query_as().fetch_optional(&mut *tx).await?;

        let Some(row) = existing else {
            tx.commit().await?;
            return Ok(DeleteResult::default());
        };

        sqlx::query("DELETE FROM entities WHERE row_id = ?")
            .bind(row.row_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let index_updates = row.into_entity()?.index_entries();
        Ok(DeleteResult { index_updates })
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn health_check(&self) -> DatastoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    row_id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    key_name TEXT,
    data TEXT NOT NULL,
    unindexed TEXT NOT NULL DEFAULT '[]',
    UNIQUE (kind, key_name)
);
CREATE INDEX IF NOT EXISTS idx_entities_kind ON entities (kind, row_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(kind: &str, data: Value) -> Entity {
        let Value::Object(map) = data else {
            panic!("expected an object");
        };
        Entity::new(Key::new(kind), map)
    }

    #[test]
    fn test_property_path_quotes() {
        assert_eq!(property_path("name"), "$.\"name\"");
        assert_eq!(property_path("a\"b"), "$.\"a\\\"b\"");
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("depot.db");

        let key = {
            let store = SqliteEntityStore::new(&path).await.unwrap();
            store
                .save(row("Package", json!({"name": "lodash"})))
                .await
                .unwrap()
        };

        let reopened = SqliteEntityStore::new(&path).await.unwrap();
        let entity = reopened.get(&key).await.unwrap().unwrap();
        assert_eq!(entity.get("name"), Some(&json!("lodash")));
    }

    #[tokio::test]
    async fn test_filters_by_type() {
        let store = SqliteEntityStore::in_memory().await.unwrap();
        store
            .save(row(
                "Package",
                json!({"name": "a", "private": true, "downloads": 3, "tags": ["x"]}),
            ))
            .await
            .unwrap();
        store
            .save(row("Package", json!({"name": "b", "private": false, "downloads": 5})))
            .await
            .unwrap();

        let by_bool = store
            .run_query(&Query::new("Package").filter("private", true))
            .await
            .unwrap();
        assert_eq!(by_bool.len(), 1);
        assert_eq!(by_bool[0].get("name"), Some(&json!("a")));

        let by_number = store
            .run_query(&Query::new("Package").filter("downloads", 5))
            .await
            .unwrap();
        assert_eq!(by_number[0].get("name"), Some(&json!("b")));

        let by_array = store
            .run_query(&Query::new("Package").filter("tags", json!(["x"])))
            .await
            .unwrap();
        assert_eq!(by_array.len(), 1);
    }

    #[tokio::test]
    async fn test_explicit_id_of_other_kind_rejected() {
        let store = SqliteEntityStore::in_memory().await.unwrap();
        let key = store.save(row("A", json!({}))).await.unwrap();
        let Some(EntityId::Id(n)) = key.id else {
            panic!("expected numeric id");
        };

        let mut other = row("B", json!({}));
        other.key = Key::id("B", n);
        assert!(matches!(
            store.save(other).await,
            Err(DatastoreError::InvalidKey(_))
        ));
    }
}
