//! Streaming artifact download.

use super::state::{AbortHandle, Events, Lifecycle, Outcome, TerminalEvent, TransferState};
use crate::error::{RegistryError, RegistryResult};
use bytes::{Bytes, BytesMut};
use depot_core::PackageName;
use depot_storage::ObjectStore;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Chunks buffered between the blob store and the caller.
const EVENT_BUFFER: usize = 16;

/// Events of a download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadEvent {
    /// The artifact exists and its content follows.
    Open,
    /// Size declared by the blob store.
    ContentLength(u64),
    /// A chunk of content.
    Data(Bytes),
    /// All content was delivered.
    End,
    /// The download failed or was aborted.
    Error(RegistryError),
}

impl TerminalEvent for DownloadEvent {
    fn terminal(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => Self::End,
            Outcome::Error(e) => Self::Error(e),
        }
    }
}

/// Handle of an in-flight artifact download.
///
/// Drain [`next_event`](Self::next_event) until it returns `None`. A
/// missing artifact ends with a not-found error, an empty one with an
/// internal error. Dropping the handle aborts the download.
pub struct ReadTarball {
    events: Events<DownloadEvent>,
    lifecycle: Arc<Lifecycle>,
}

impl ReadTarball {
    pub(crate) fn start(blobs: Arc<dyn ObjectStore>, name: PackageName, file_name: String) -> Self {
        let lifecycle = Lifecycle::new();
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        let driver = DownloadDriver {
            blobs,
            key: name.file_path(&file_name),
            name,
            file_name,
            lifecycle: lifecycle.clone(),
            events: event_tx,
        };
        tokio::spawn(driver.run());

        Self {
            events: Events::new(event_rx, lifecycle.clone()),
            lifecycle,
        }
    }

    /// Next event, or `None` after the terminal event was delivered.
    pub async fn next_event(&mut self) -> Option<DownloadEvent> {
        self.events.next().await
    }

    /// Abort the download. Returns false if it had already ended.
    pub fn abort(&self) -> bool {
        self.lifecycle.abort()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle::new(self.lifecycle.clone())
    }

    pub fn state(&self) -> TransferState {
        self.lifecycle.state()
    }

    /// Bytes received from the blob store so far.
    pub fn bytes_transferred(&self) -> u64 {
        self.lifecycle.bytes()
    }

    /// Collect the whole artifact.
    pub async fn read_to_end(mut self) -> RegistryResult<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(event) = self.next_event().await {
            match event {
                DownloadEvent::Open => {}
                DownloadEvent::ContentLength(len) => {
                    buf.reserve(usize::try_from(len).unwrap_or(0));
                }
                DownloadEvent::Data(chunk) => buf.extend_from_slice(&chunk),
                DownloadEvent::End => return Ok(buf.freeze()),
                DownloadEvent::Error(e) => return Err(e),
            }
        }
        Err(RegistryError::Internal("download ended without a result".to_string()))
    }
}

impl Drop for ReadTarball {
    fn drop(&mut self) {
        self.lifecycle.abort();
    }
}

struct DownloadDriver {
    blobs: Arc<dyn ObjectStore>,
    name: PackageName,
    file_name: String,
    key: String,
    lifecycle: Arc<Lifecycle>,
    events: mpsc::Sender<DownloadEvent>,
}

impl DownloadDriver {
    async fn run(self) {
        let cancel = self.lifecycle.cancel_token().clone();

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            opened = self.blobs.get_stream(&self.key) => opened,
        };
        let response = match opened {
            Ok(response) => response,
            Err(e) if e.is_not_found() => {
                debug!(name = %self.name, file = %self.file_name, "tarball not found");
                self.lifecycle.fail(RegistryError::no_such_package());
                return;
            }
            Err(e) => {
                error!(name = %self.name, file = %self.file_name, error = %e, "failed to open tarball");
                self.lifecycle.fail(RegistryError::bad_request(e));
                return;
            }
        };

        if response.status == 404 {
            debug!(name = %self.name, file = %self.file_name, "tarball not found");
            self.lifecycle.fail(RegistryError::no_such_package());
            return;
        }
        if response.content_length == Some(0) {
            error!(name = %self.name, file = %self.file_name, "tarball is empty");
            self.lifecycle
                .fail(RegistryError::Internal("file content empty".to_string()));
            return;
        }

        self.lifecycle.advance(TransferState::Opened);
        if !self.emit(DownloadEvent::Open).await {
            return;
        }
        if let Some(len) = response.content_length
            && response.status == 200
            && !self.emit(DownloadEvent::ContentLength(len)).await
        {
            return;
        }

        let mut body = response.body;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                next = body.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    self.lifecycle.add_bytes(chunk.len() as u64);
                    if !self.emit(DownloadEvent::Data(chunk)).await {
                        return;
                    }
                }
                Some(Err(e)) if e.is_not_found() => {
                    debug!(name = %self.name, file = %self.file_name, "tarball disappeared while reading");
                    self.lifecycle.fail(RegistryError::no_such_package());
                    return;
                }
                Some(Err(e)) => {
                    error!(name = %self.name, file = %self.file_name, error = %e, "tarball read failed");
                    self.lifecycle.fail(RegistryError::bad_request(e));
                    return;
                }
                None => break,
            }
        }

        if self.lifecycle.succeed() {
            debug!(name = %self.name, file = %self.file_name, bytes = self.lifecycle.bytes(), "tarball read");
        }
    }

    /// Deliver a progress event. Returns false once the consumer aborted
    /// or went away.
    async fn emit(&self, event: DownloadEvent) -> bool {
        let cancel = self.lifecycle.cancel_token();
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = self.events.send(event) => sent.is_ok(),
        };
        if !sent {
            warn!(name = %self.name, file = %self.file_name, "tarball download aborted");
        }
        sent
    }
}
