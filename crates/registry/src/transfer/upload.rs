//! Streaming artifact upload.

use super::state::{AbortHandle, Events, Lifecycle, Outcome, TerminalEvent, TransferState};
use crate::error::{RegistryError, RegistryResult};
use bytes::Bytes;
use depot_core::PackageName;
use depot_storage::{ObjectStore, StorageError, StreamingUpload, WriteOptions};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Chunks buffered between the caller and the blob store.
const DATA_BUFFER: usize = 16;

/// Events of an upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadEvent {
    /// The blob store accepted the write; data is being forwarded.
    Open,
    /// The artifact is stored.
    Success,
    /// The upload failed or was aborted.
    Error(RegistryError),
}

impl TerminalEvent for UploadEvent {
    fn terminal(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => Self::Success,
            Outcome::Error(e) => Self::Error(e),
        }
    }
}

/// Handle of an in-flight artifact upload.
///
/// Feed the content with [`write`](Self::write), call
/// [`done`](Self::done) once everything is written, and drain
/// [`next_event`](Self::next_event) until it returns `None`.
/// The artifact must not exist yet: an existing one fails the upload with
/// a conflict before any data is forwarded, and a concurrent upload that
/// commits first fails this one with the same conflict. Dropping the handle before
/// the terminal event aborts the upload.
pub struct UploadTarball {
    data: Option<mpsc::Sender<Bytes>>,
    events: Events<UploadEvent>,
    lifecycle: Arc<Lifecycle>,
}

impl UploadTarball {
    pub(crate) fn start(
        blobs: Arc<dyn ObjectStore>,
        options: WriteOptions,
        name: PackageName,
        file_name: String,
    ) -> Self {
        let lifecycle = Lifecycle::new();
        let (data_tx, data_rx) = mpsc::channel(DATA_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(1);

        let driver = UploadDriver {
            blobs,
            options: options.create_only(),
            key: name.file_path(&file_name),
            name,
            file_name,
            lifecycle: lifecycle.clone(),
            events: event_tx,
        };
        tokio::spawn(driver.run(data_rx));

        Self {
            data: Some(data_tx),
            events: Events::new(event_rx, lifecycle.clone()),
            lifecycle,
        }
    }

    /// Queue a chunk for upload. Waits while the buffer is full.
    pub async fn write(&self, chunk: Bytes) -> RegistryResult<()> {
        let Some(data) = &self.data else {
            return Err(RegistryError::BadRequest(
                "upload input already finished".to_string(),
            ));
        };
        if self.lifecycle.state().is_terminal() {
            return Err(RegistryError::BadRequest("upload already ended".to_string()));
        }
        data.send(chunk)
            .await
            .map_err(|_| RegistryError::BadRequest("upload is no longer accepting data".to_string()))
    }

    /// Signal the end of the content.
    pub fn done(&mut self) {
        self.data = None;
    }

    /// Abort the upload. Returns false if it had already ended.
    pub fn abort(&self) -> bool {
        self.lifecycle.abort()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle::new(self.lifecycle.clone())
    }

    /// Next event, or `None` after the terminal event was delivered.
    pub async fn next_event(&mut self) -> Option<UploadEvent> {
        self.events.next().await
    }

    pub fn state(&self) -> TransferState {
        self.lifecycle.state()
    }

    /// Bytes handed to the blob store so far.
    pub fn bytes_transferred(&self) -> u64 {
        self.lifecycle.bytes()
    }

    /// Finish the input and wait for the terminal event.
    pub async fn finish(mut self) -> RegistryResult<()> {
        self.done();
        while let Some(event) = self.next_event().await {
            match event {
                UploadEvent::Open => {}
                UploadEvent::Success => return Ok(()),
                UploadEvent::Error(e) => return Err(e),
            }
        }
        Err(RegistryError::Internal("upload ended without a result".to_string()))
    }
}

impl Drop for UploadTarball {
    fn drop(&mut self) {
        // An unfinished upload does not outlive its handle.
        self.lifecycle.abort();
    }
}

struct UploadDriver {
    blobs: Arc<dyn ObjectStore>,
    options: WriteOptions,
    name: PackageName,
    file_name: String,
    key: String,
    lifecycle: Arc<Lifecycle>,
    events: mpsc::Sender<UploadEvent>,
}

impl UploadDriver {
    async fn run(self, mut data: mpsc::Receiver<Bytes>) {
        let cancel = self.lifecycle.cancel_token().clone();

        let exists = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            exists = self.blobs.exists(&self.key) => exists,
        };
        match exists {
            Ok(false) => {}
            Ok(true) => {
                debug!(name = %self.name, file = %self.file_name, "tarball already exists");
                self.lifecycle
                    .fail(RegistryError::already_exists(&self.file_name));
                return;
            }
            Err(e) => {
                error!(name = %self.name, file = %self.file_name, error = %e, "failed to check tarball existence");
                self.lifecycle.fail(RegistryError::internal(e));
                return;
            }
        }

        info!(name = %self.name, file = %self.file_name, "tarball is being uploaded");
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            opened = self.blobs.put_stream(&self.key, &self.options) => opened,
        };
        let mut upload = match opened {
            Ok(upload) => upload,
            Err(e) => {
                error!(name = %self.name, file = %self.file_name, error = %e, "failed to open tarball upload");
                self.lifecycle.fail(RegistryError::bad_request(e));
                return;
            }
        };

        self.lifecycle.advance(TransferState::Opened);
        if self.events.send(UploadEvent::Open).await.is_err() {
            self.discard(upload, "upload handle dropped").await;
            return;
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                chunk = data.recv() => Some(chunk),
            };
            let chunk = match next {
                None => {
                    self.discard(upload, "tarball upload aborted").await;
                    return;
                }
                Some(None) => break,
                Some(Some(chunk)) => chunk,
            };

            let len = chunk.len() as u64;
            let written = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                written = upload.write(chunk) => Some(written),
            };
            match written {
                None => {
                    self.discard(upload, "tarball upload aborted").await;
                    return;
                }
                Some(Err(e)) => {
                    error!(name = %self.name, file = %self.file_name, error = %e, "tarball upload failed");
                    self.lifecycle.fail(RegistryError::bad_request(&e));
                    self.discard(upload, "tarball upload failed").await;
                    return;
                }
                Some(Ok(())) => self.lifecycle.add_bytes(len),
            }
        }

        if cancel.is_cancelled() {
            self.discard(upload, "tarball upload aborted").await;
            return;
        }

        // Finishing is not raced against abort: a half-finished write
        // would leave the object in an unknown state.
        match upload.finish().await {
            Ok(size) => {
                if self.lifecycle.succeed() {
                    debug!(name = %self.name, file = %self.file_name, size, "tarball uploaded");
                } else {
                    warn!(name = %self.name, file = %self.file_name, "tarball upload aborted after completion, removing it");
                    if let Err(e) = self.blobs.delete(&self.key).await {
                        error!(name = %self.name, file = %self.file_name, error = %e, "failed to remove aborted tarball");
                    }
                }
            }
            Err(StorageError::AlreadyExists(_)) => {
                debug!(name = %self.name, file = %self.file_name, "tarball stored concurrently by another upload");
                self.lifecycle
                    .fail(RegistryError::already_exists(&self.file_name));
            }
            Err(e) => {
                error!(name = %self.name, file = %self.file_name, error = %e, "tarball upload failed");
                self.lifecycle.fail(RegistryError::bad_request(e));
            }
        }
    }

    async fn discard(&self, upload: Box<dyn StreamingUpload>, reason: &str) {
        warn!(name = %self.name, file = %self.file_name, reason, "discarding tarball upload");
        if let Err(e) = upload.abort().await {
            debug!(name = %self.name, file = %self.file_name, error = %e, "failed to abort tarball upload");
        }
    }
}
