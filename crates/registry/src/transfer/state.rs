//! Transfer lifecycle shared by the upload and download handles.

use crate::error::RegistryError;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Message of the error delivered after `abort()`.
pub const ABORTED: &str = "transmission aborted";

/// Transfer state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferState {
    /// Handle exists, nothing opened yet.
    Created,
    /// Channel to the blob store is open.
    Opened,
    /// At least one chunk has moved.
    Transferring,
    /// Transfer completed.
    Succeeded,
    /// Transfer ended with an error.
    Failed,
    /// Transfer was cancelled by the caller.
    Aborted,
}

impl TransferState {
    /// Check if the transfer reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Opened => "opened",
            Self::Transferring => "transferring",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a transfer ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Success,
    Error(RegistryError),
}

/// Events that can carry an [`Outcome`].
pub(crate) trait TerminalEvent: Sized {
    fn terminal(outcome: Outcome) -> Self;
}

struct Inner {
    state: TransferState,
    bytes: u64,
    outcome: Option<Outcome>,
}

/// State shared between a handle and the task driving its transfer.
///
/// The first terminal transition wins and records the only outcome the
/// consumer will see.
pub(crate) struct Lifecycle {
    inner: Mutex<Inner>,
    cancel: CancellationToken,
}

impl Lifecycle {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state: TransferState::Created,
                bytes: 0,
                outcome: None,
            }),
            cancel: CancellationToken::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn state(&self) -> TransferState {
        self.lock().state
    }

    pub(crate) fn bytes(&self) -> u64 {
        self.lock().bytes
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Move to a non-terminal state. Ignored once terminal.
    pub(crate) fn advance(&self, to: TransferState) {
        let mut inner = self.lock();
        if !inner.state.is_terminal() {
            inner.state = to;
        }
    }

    pub(crate) fn add_bytes(&self, n: u64) {
        let mut inner = self.lock();
        inner.bytes += n;
        if inner.state == TransferState::Opened {
            inner.state = TransferState::Transferring;
        }
    }

    /// Record success. Returns false if the transfer already ended.
    pub(crate) fn succeed(&self) -> bool {
        self.finish(TransferState::Succeeded, Outcome::Success)
    }

    /// Record a failure. Returns false if the transfer already ended.
    pub(crate) fn fail(&self, err: RegistryError) -> bool {
        self.finish(TransferState::Failed, Outcome::Error(err))
    }

    /// Record an abort and cancel the driving task. Returns false if the
    /// transfer already ended.
    pub(crate) fn abort(&self) -> bool {
        let aborted = self.finish(
            TransferState::Aborted,
            Outcome::Error(RegistryError::BadRequest(ABORTED.to_string())),
        );
        if aborted {
            self.cancel.cancel();
        }
        aborted
    }

    fn finish(&self, state: TransferState, outcome: Outcome) -> bool {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = state;
        inner.outcome = Some(outcome);
        true
    }

    fn take_outcome(&self) -> Option<Outcome> {
        self.lock().outcome.take()
    }
}

/// Cloneable handle that aborts a transfer from anywhere.
#[derive(Clone)]
pub struct AbortHandle {
    lifecycle: Arc<Lifecycle>,
}

impl AbortHandle {
    pub(crate) fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self { lifecycle }
    }

    /// Abort the transfer. Returns false if it had already ended.
    pub fn abort(&self) -> bool {
        self.lifecycle.abort()
    }

    pub fn is_aborted(&self) -> bool {
        self.lifecycle.state() == TransferState::Aborted
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortHandle")
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

/// Consumer side of a transfer: progress events from the driving task,
/// then exactly one terminal event, then `None`.
pub(crate) struct Events<E> {
    rx: mpsc::Receiver<E>,
    lifecycle: Arc<Lifecycle>,
    finished: bool,
}

impl<E: TerminalEvent> Events<E> {
    pub(crate) fn new(rx: mpsc::Receiver<E>, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            rx,
            lifecycle,
            finished: false,
        }
    }

    pub(crate) async fn next(&mut self) -> Option<E> {
        if self.finished {
            return None;
        }

        // Progress events queued before an abort are dropped.
        tokio::select! {
            biased;
            _ = self.lifecycle.cancel.cancelled() => {}
            event = self.rx.recv() => {
                if let Some(event) = event {
                    return Some(event);
                }
            }
        }

        self.finished = true;
        self.rx.close();
        let outcome = self.lifecycle.take_outcome().unwrap_or_else(|| {
            // The driving task went away without recording an outcome.
            let err = RegistryError::Internal("transfer ended unexpectedly".to_string());
            self.lifecycle.fail(err.clone());
            Outcome::Error(err)
        });
        Some(E::terminal(outcome))
    }
}
