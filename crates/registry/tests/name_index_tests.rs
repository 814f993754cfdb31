// Name index behavior over real and scripted entity stores

mod common;

use common::{ScriptedEntityStore, name};
use depot_datastore::{Entity, EntityAdapter, EntityStore, Key, MemoryEntityStore, SqliteEntityStore};
use depot_registry::{NameIndex, RegistryError};
use serde_json::{Map, json};
use std::sync::Arc;

const KIND: &str = "VerdaccioDataStore";

async fn indexes() -> Vec<NameIndex> {
    let stores: Vec<Arc<dyn EntityStore>> = vec![
        Arc::new(MemoryEntityStore::new()),
        Arc::new(SqliteEntityStore::in_memory().await.unwrap()),
    ];
    stores
        .into_iter()
        .map(|store| NameIndex::new(EntityAdapter::new(store), KIND))
        .collect()
}

fn scripted(
    rows: Vec<Entity>,
    delete_result: Result<i64, String>,
) -> (Arc<ScriptedEntityStore>, NameIndex) {
    let store = Arc::new(ScriptedEntityStore::new(rows, delete_result));
    let index = NameIndex::new(EntityAdapter::new(store.clone()), KIND);
    (store, index)
}

fn row(id: i64, name: &str) -> Entity {
    let mut data = Map::new();
    data.insert("name".to_string(), json!(name));
    Entity::new(Key::id(KIND, id), data)
}

#[tokio::test]
async fn test_add_then_list() {
    for index in indexes().await {
        index.add(&name("lodash")).await.unwrap();
        assert_eq!(index.list().await.unwrap(), vec![name("lodash")]);
    }
}

#[tokio::test]
async fn test_list_keeps_store_order() {
    for index in indexes().await {
        for n in ["react", "lodash", "@types/node"] {
            index.add(&name(n)).await.unwrap();
        }
        assert_eq!(
            index.list().await.unwrap(),
            vec![name("react"), name("lodash"), name("@types/node")]
        );
    }
}

#[tokio::test]
async fn test_duplicates_are_kept_and_removed_together() {
    for index in indexes().await {
        index.add(&name("lodash")).await.unwrap();
        index.add(&name("lodash")).await.unwrap();
        index.add(&name("react")).await.unwrap();
        assert_eq!(index.list().await.unwrap().len(), 3);

        index.remove(&name("lodash")).await.unwrap();
        assert_eq!(index.list().await.unwrap(), vec![name("react")]);
    }
}

#[tokio::test]
async fn test_remove_unknown_name_is_not_found() {
    for index in indexes().await {
        index.add(&name("react")).await.unwrap();
        assert_eq!(
            index.remove(&name("lodash")).await,
            Err(RegistryError::NotFound("not found".to_string()))
        );
        assert_eq!(index.list().await.unwrap(), vec![name("react")]);
    }
}

#[tokio::test]
async fn test_remove_twice_is_not_found() {
    for index in indexes().await {
        index.add(&name("lodash")).await.unwrap();
        index.remove(&name("lodash")).await.unwrap();
        assert!(matches!(
            index.remove(&name("lodash")).await,
            Err(RegistryError::NotFound(_))
        ));
    }
}

#[tokio::test]
async fn test_remove_with_zero_index_updates_is_not_found() {
    let (store, index) = scripted(vec![row(1, "lodash")], Ok(0));
    assert_eq!(
        index.remove(&name("lodash")).await,
        Err(RegistryError::NotFound("not found".to_string()))
    );
    assert_eq!(store.deleted.lock().unwrap().as_slice(), [Key::id(KIND, 1)]);
}

#[tokio::test]
async fn test_remove_with_negative_index_updates_is_invariant_violation() {
    let (_store, index) = scripted(vec![row(1, "lodash")], Ok(-1));
    let err = index.remove(&name("lodash")).await.unwrap_err();
    assert_eq!(
        err,
        RegistryError::InvariantViolation("this should not happen".to_string())
    );
    assert_eq!(err.status_code(), 500);
}

#[tokio::test]
async fn test_remove_deletes_only_matching_rows() {
    let rows = vec![row(1, "lodash"), row(2, "react"), row(3, "lodash")];
    let (store, index) = scripted(rows, Ok(2));
    index.remove(&name("lodash")).await.unwrap();
    assert_eq!(
        store.deleted.lock().unwrap().as_slice(),
        [Key::id(KIND, 1), Key::id(KIND, 3)]
    );
}

#[tokio::test]
async fn test_remove_delete_failure_is_internal() {
    let (_store, index) = scripted(vec![row(1, "lodash")], Err("connection reset".to_string()));
    let err = index.remove(&name("lodash")).await.unwrap_err();
    assert!(matches!(err, RegistryError::Internal(ref m) if m.contains("connection reset")));
}

#[tokio::test]
async fn test_add_failure_is_internal() {
    let store =
        Arc::new(ScriptedEntityStore::new(Vec::new(), Ok(0)).with_failing_save("quota exceeded"));
    let index = NameIndex::new(EntityAdapter::new(store), KIND);
    let err = index.add(&name("lodash")).await.unwrap_err();
    assert!(matches!(err, RegistryError::Internal(ref m) if m.contains("quota exceeded")));
}

#[tokio::test]
async fn test_kinds_do_not_share_names() {
    let store: Arc<dyn EntityStore> = Arc::new(MemoryEntityStore::new());
    let public = NameIndex::new(EntityAdapter::new(store.clone()), "Public");
    let private = NameIndex::new(EntityAdapter::new(store), "Private");

    public.add(&name("lodash")).await.unwrap();
    assert!(private.list().await.unwrap().is_empty());
    assert!(matches!(
        private.remove(&name("lodash")).await,
        Err(RegistryError::NotFound(_))
    ));
}
