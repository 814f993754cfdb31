use depot_datastore::{Entity, EntityStore, Key, MemoryEntityStore, SqliteEntityStore};
use serde_json::{Map, json};
use std::sync::Arc;

/// Every store implementation, each freshly created.
#[allow(dead_code)]
pub async fn stores() -> Vec<Arc<dyn EntityStore>> {
    vec![
        Arc::new(MemoryEntityStore::new()),
        Arc::new(SqliteEntityStore::in_memory().await.unwrap()),
    ]
}

/// Name index row with an incomplete key.
#[allow(dead_code)]
pub fn name_row(kind: &str, name: &str) -> Entity {
    let mut data = Map::new();
    data.insert("name".to_string(), json!(name));
    Entity::new(Key::new(kind), data)
}
