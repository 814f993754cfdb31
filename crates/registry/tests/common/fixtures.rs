use bytes::Bytes;
use depot_core::{PackageName, StoreConfig};
use depot_datastore::MemoryEntityStore;
use depot_registry::RegistryDatabase;
use depot_storage::{FilesystemBackend, ObjectStore};
use std::sync::Arc;
use tempfile::TempDir;

/// Database over a filesystem blob store in a fresh temp dir and an
/// in-memory entity store.
#[allow(dead_code)]
pub async fn database() -> (TempDir, RegistryDatabase) {
    let dir = TempDir::new().unwrap();
    let blobs = FilesystemBackend::new(dir.path(), "registry").await.unwrap();
    let db = RegistryDatabase::new(
        Some(&StoreConfig::new("registry", "test-project")),
        Arc::new(blobs),
        Arc::new(MemoryEntityStore::new()),
    )
    .unwrap();
    (dir, db)
}

/// Database over the given blob store and an in-memory entity store.
#[allow(dead_code)]
pub fn database_with_blobs(blobs: Arc<dyn ObjectStore>) -> RegistryDatabase {
    RegistryDatabase::new(
        Some(&StoreConfig::new("registry", "test-project")),
        blobs,
        Arc::new(MemoryEntityStore::new()),
    )
    .unwrap()
}

#[allow(dead_code)]
pub fn name(name: &str) -> PackageName {
    PackageName::new(name).unwrap()
}

/// Deterministic pseudo-random content.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut state = seed;
    let data: Vec<u8> = (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            (state >> 33) as u8
        })
        .collect();
    Bytes::from(data)
}
