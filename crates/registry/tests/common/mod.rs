pub mod fixtures;
pub mod mocks;

#[allow(unused_imports)]
pub use fixtures::{database, database_with_blobs, name, seeded_bytes};
#[allow(unused_imports)]
pub use mocks::{MockBlobStore, ReadScript, ScriptedEntityStore, WriteScript};
