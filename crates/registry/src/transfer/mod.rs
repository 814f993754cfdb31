//! Streaming artifact transfers.
//!
//! Each transfer runs on its own task and reports through an event handle:
//! progress events, then exactly one terminal event (success or error).
//! `abort()` ends a transfer with a bad-request error and suppresses any
//! progress event that has not been delivered yet.

pub mod download;
pub mod state;
pub mod upload;

pub use download::{DownloadEvent, ReadTarball};
pub use state::{ABORTED, AbortHandle, TransferState};
pub use upload::{UploadEvent, UploadTarball};
