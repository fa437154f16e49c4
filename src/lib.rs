//! Incrementally maintained Dandi Zarr checksums over object storage
//!
//! A Zarr archive is a tree of chunk files stored as flat object storage keys.
//! Its checksum is the root of a Merkle tree of per-directory checksum
//! manifests, also kept in object storage.  When files are uploaded or
//! removed, only the manifests of the directories along the changed paths are
//! rewritten.
pub mod archive;
pub mod checksum;
pub mod config;
pub mod errors;
pub mod manifest;
pub mod repository;
pub mod store;
pub mod updater;
mod util;
pub mod zarr;
pub use crate::archive::{
    ArchiveManager, ArchiveStatus, ArchiveSummary, SessionState, UploadFile, UploadTicket,
    Visibility, ZarrArchive,
};
pub use crate::checksum::{ChecksumListing, EMPTY_CHECKSUM};
pub use crate::config::Config;
pub use crate::errors::*;
pub use crate::repository::{ArchiveRepository, JsonFileRepository, MemoryRepository};
pub use crate::store::{LocalStore, MemoryStore, ObjectStore};
pub use crate::updater::{CommitSummary, FileChange, TreeUpdater};
