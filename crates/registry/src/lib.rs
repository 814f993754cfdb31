//! Package storage engine for depot.
//!
//! This crate provides:
//! - `RegistryDatabase`: name index, secret and per-package handles
//! - `PackageStorage`: metadata documents and tarball transfers of one package
//! - Event-driven upload and download handles with cancellation

pub mod database;
pub mod error;
pub mod metadata;
pub mod name_index;
pub mod package;
pub mod transfer;

pub use database::RegistryDatabase;
pub use error::{NO_SUCH_PACKAGE, RegistryError, RegistryResult, SetupError};
pub use metadata::MetadataStore;
pub use name_index::NameIndex;
pub use package::PackageStorage;
pub use transfer::{
    ABORTED, AbortHandle, DownloadEvent, ReadTarball, TransferState, UploadEvent, UploadTarball,
};

pub use depot_core::{PackageName, StoreConfig};
