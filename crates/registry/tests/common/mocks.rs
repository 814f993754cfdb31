use async_trait::async_trait;
use bytes::Bytes;
use depot_datastore::{
    DatastoreError, DatastoreResult, DeleteResult, Entity, EntityStore, Key, Query,
};
use depot_storage::{
    ByteStream, ObjectResponse, ObjectStore, StorageError, StorageResult,
    StreamingUpload, WriteOptions,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What `get_stream` answers.
#[allow(dead_code)]
#[derive(Clone)]
pub enum ReadScript {
    /// Fails with `StorageError::NotFound`.
    Missing,
    /// Responds with the given status and declared size, then streams
    /// `chunks`.
    Respond {
        status: u16,
        content_length: Option<u64>,
        chunks: Vec<Bytes>,
    },
    /// Streams `chunks`, then fails with `message`.
    Broken { chunks: Vec<Bytes>, message: String },
    /// Streams a small chunk every few milliseconds, forever.
    Endless,
}

/// How streaming uploads behave.
#[allow(dead_code)]
#[derive(Clone)]
pub enum WriteScript {
    /// Accept every chunk.
    Accept,
    /// Fail the first write with `message`.
    FailWrite(String),
    /// Never complete a write.
    Stall,
    /// Accept every chunk, then refuse the commit because another writer
    /// stored the object first.
    Taken,
}

/// Blob store with scripted answers that counts what it was asked to do.
#[allow(dead_code)]
pub struct MockBlobStore {
    exists: Result<bool, String>,
    read: ReadScript,
    write: WriteScript,
    fail_put: Option<String>,
    fail_delete: Option<String>,
    objects: Mutex<HashMap<String, Bytes>>,
    pub put_stream_calls: AtomicUsize,
    pub upload_aborts: Arc<AtomicUsize>,
    pub stream_options: Mutex<Vec<WriteOptions>>,
}

#[allow(dead_code)]
impl MockBlobStore {
    pub fn new() -> Self {
        Self {
            exists: Ok(false),
            read: ReadScript::Missing,
            write: WriteScript::Accept,
            fail_put: None,
            fail_delete: None,
            objects: Mutex::new(HashMap::new()),
            put_stream_calls: AtomicUsize::new(0),
            upload_aborts: Arc::new(AtomicUsize::new(0)),
            stream_options: Mutex::new(Vec::new()),
        }
    }

    pub fn with_exists(mut self, exists: Result<bool, String>) -> Self {
        self.exists = exists;
        self
    }

    pub fn with_read(mut self, read: ReadScript) -> Self {
        self.read = read;
        self
    }

    pub fn with_write(mut self, write: WriteScript) -> Self {
        self.write = write;
        self
    }

    pub fn with_failing_put(mut self, message: &str) -> Self {
        self.fail_put = Some(message.to_string());
        self
    }

    pub fn with_failing_delete(mut self, message: &str) -> Self {
        self.fail_delete = Some(message.to_string());
        self
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    fn failure(message: &str) -> StorageError {
        StorageError::Io(std::io::Error::other(message.to_string()))
    }
}

#[async_trait]
impl ObjectStore for MockBlobStore {
    async fn exists(&self, _key: &str) -> StorageResult<bool> {
        self.exists.clone().map_err(|m| Self::failure(&m))
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.object(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ObjectResponse> {
        let (status, content_length, body) = match &self.read {
            ReadScript::Missing => return Err(StorageError::NotFound(key.to_string())),
            ReadScript::Respond {
                status,
                content_length,
                chunks,
            } => {
                let items: Vec<StorageResult<Bytes>> = chunks.iter().cloned().map(Ok).collect();
                let body: ByteStream = Box::pin(futures::stream::iter(items));
                (*status, *content_length, body)
            }
            ReadScript::Broken { chunks, message } => {
                let mut items: Vec<StorageResult<Bytes>> =
                    chunks.iter().cloned().map(Ok).collect();
                items.push(Err(Self::failure(message)));
                let len = chunks.iter().map(|c| c.len() as u64).sum::<u64>() + 1;
                let body: ByteStream = Box::pin(futures::stream::iter(items));
                (200, Some(len), body)
            }
            ReadScript::Endless => {
                let body = futures::stream::unfold((), |()| async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Some((Ok(Bytes::from_static(b"chunk")), ()))
                });
                let body: ByteStream = Box::pin(body);
                (200, None, body)
            }
        };
        Ok(ObjectResponse {
            status,
            content_length,
            body,
        })
    }

    async fn put(&self, key: &str, data: Bytes, _options: &WriteOptions) -> StorageResult<()> {
        if let Some(message) = &self.fail_put {
            return Err(Self::failure(message));
        }
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn put_stream(
        &self,
        key: &str,
        options: &WriteOptions,
    ) -> StorageResult<Box<dyn StreamingUpload>> {
        self.put_stream_calls.fetch_add(1, Ordering::SeqCst);
        self.stream_options.lock().unwrap().push(*options);
        Ok(Box::new(MockUpload {
            key: key.to_string(),
            script: self.write.clone(),
            buffer: Vec::new(),
            aborts: self.upload_aborts.clone(),
        }))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        if let Some(message) = &self.fail_delete {
            return Err(Self::failure(message));
        }
        self.objects
            .lock()
            .unwrap()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "mock"
    }
}

struct MockUpload {
    key: String,
    script: WriteScript,
    buffer: Vec<u8>,
    aborts: Arc<AtomicUsize>,
}

#[async_trait]
impl StreamingUpload for MockUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        match &self.script {
            WriteScript::Accept | WriteScript::Taken => {
                self.buffer.extend_from_slice(&data);
                Ok(())
            }
            WriteScript::FailWrite(message) => Err(MockBlobStore::failure(message)),
            WriteScript::Stall => futures::future::pending().await,
        }
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        match self.script {
            WriteScript::Taken => Err(StorageError::AlreadyExists(self.key)),
            _ => Ok(self.buffer.len() as u64),
        }
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Entity store holding fixed rows whose deletes report a scripted
/// index update count.
#[allow(dead_code)]
pub struct ScriptedEntityStore {
    rows: Vec<Entity>,
    delete_result: Result<i64, String>,
    fail_save: Option<String>,
    pub deleted: Mutex<Vec<Key>>,
}

#[allow(dead_code)]
impl ScriptedEntityStore {
    pub fn new(rows: Vec<Entity>, delete_result: Result<i64, String>) -> Self {
        Self {
            rows,
            delete_result,
            fail_save: None,
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn with_failing_save(mut self, message: &str) -> Self {
        self.fail_save = Some(message.to_string());
        self
    }
}

#[async_trait]
impl EntityStore for ScriptedEntityStore {
    async fn run_query(&self, query: &Query) -> DatastoreResult<Vec<Entity>> {
        Ok(self
            .rows
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect())
    }

    async fn get(&self, key: &Key) -> DatastoreResult<Option<Entity>> {
        Ok(self.rows.iter().find(|e| &e.key == key).cloned())
    }

    async fn save(&self, entity: Entity) -> DatastoreResult<Key> {
        match &self.fail_save {
            Some(message) => Err(DatastoreError::Internal(message.clone())),
            None => Ok(entity.key),
        }
    }

    async fn update(&self, entity: Entity) -> DatastoreResult<()> {
        Err(DatastoreError::NotFound(entity.key.to_string()))
    }

    async fn delete(&self, key: &Key) -> DatastoreResult<DeleteResult> {
        self.deleted.lock().unwrap().push(key.clone());
        match &self.delete_result {
            Ok(index_updates) => Ok(DeleteResult {
                index_updates: *index_updates,
            }),
            Err(message) => Err(DatastoreError::Internal(message.clone())),
        }
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}
