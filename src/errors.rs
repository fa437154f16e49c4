use crate::zarr::{DirPath, EntryPath};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error returned when a string is not a valid single path component
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("invalid path component: {0:?}")]
pub struct EntryNameError(pub String);

/// Error returned when a string is not a valid relative path within a Zarr
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("invalid Zarr entry path: {0:?}")]
pub struct EntryPathError(pub String);

/// Error returned when parsing an unknown archive visibility
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("invalid visibility {0:?}; expected \"public\" or \"embargoed\"")]
pub struct ParseVisibilityError(pub String);

/// Error constructing a directory listing
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ListingError {
    #[error("two entries in the same listing are named {name:?}")]
    DuplicateName { name: String },

    #[error("{name:?} is listed as both a file and a directory")]
    NameConflict { name: String },
}

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ChecksumTreeError {
    #[error("Path type conflict error for {path:?}")]
    PathTypeConflict { path: EntryPath },

    #[error("File {path:?} added to checksum tree twice")]
    DoubleAdd { path: EntryPath },

    #[error(transparent)]
    Listing(#[from] ListingError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("invalid object key: {key:?}")]
    InvalidKey { key: String },

    #[error("I/O error on object {key}: {source}")]
    Io { key: String, source: io::Error },
}

impl StoreError {
    pub fn not_found<S: Into<String>>(key: S) -> Self {
        StoreError::NotFound { key: key.into() }
    }

    pub fn io<S: Into<String>>(key: S, source: io::Error) -> Self {
        StoreError::Io {
            key: key.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("checksum manifest {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

impl ManifestError {
    pub(crate) fn corrupt<S: Into<String>, R: ToString>(key: S, reason: R) -> Self {
        ManifestError::Corrupt {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// A problem with one file of a commit, detected before anything is written
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ValidationError {
    #[error("File {path} does not exist.")]
    FileNotFound { path: EntryPath },

    #[error("File {path} ETag {actual} does not match reported checksum {expected}.")]
    ETagMismatch {
        path: EntryPath,
        expected: String,
        actual: String,
    },

    #[error("File {path} appears more than once in the same commit.")]
    DuplicatePath { path: EntryPath },
}

impl ValidationError {
    pub fn path(&self) -> &EntryPath {
        match self {
            ValidationError::FileNotFound { path }
            | ValidationError::ETagMismatch { path, .. }
            | ValidationError::DuplicatePath { path } => path,
        }
    }
}

#[derive(Debug, Error)]
pub enum CommitError {
    /// One or more files failed validation; nothing was written
    #[error("{} file(s) failed validation", .0.len())]
    Validation(Vec<ValidationError>),

    #[error("cannot regenerate listing for directory {dir}: {source}")]
    Listing { dir: DirPath, source: ListingError },

    #[error(transparent)]
    Tree(#[from] ChecksumTreeError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A storage write failed after validation; the archive's manifests are
    /// now only partially updated and need to be rebuilt
    #[error("commit interrupted after {applied} of {total} storage writes: {source}")]
    PartialCommit {
        applied: usize,
        total: usize,
        source: ManifestError,
    },
}

impl CommitError {
    /// True iff the failure happened before any storage was modified
    pub fn is_clean(&self) -> bool {
        !matches!(self, CommitError::PartialCommit { .. })
    }
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("no Zarr archive with ID {id:?}")]
    NotFound { id: String },

    #[error("a Zarr archive with ID {id:?} already exists")]
    AlreadyExists { id: String },

    #[error("Zarr archive {id:?} was modified concurrently")]
    VersionConflict { id: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("error (de)serializing archive record {}: {source}", .path.display())]
    Serde {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl RepositoryError {
    pub(crate) fn serde<P: AsRef<Path>>(path: P, source: serde_json::Error) -> Self {
        RepositoryError::Serde {
            path: path.as_ref().into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Simultaneous uploads are not allowed.")]
    SimultaneousUpload { id: String },

    #[error("No upload in progress.")]
    NoUploadInProgress { id: String },

    #[error("Zarr archive {id:?} has an upload in progress")]
    UploadInProgress { id: String },

    #[error("Path {path} was declared more than once in the same upload")]
    DuplicateUploadPath { path: EntryPath },

    #[error("Cannot upload {count} files at once; the limit is {max}")]
    TooManyFiles { count: usize, max: usize },

    #[error("gave up updating Zarr archive {id:?} after repeated concurrent modification")]
    Contention { id: String },

    #[error("invalid Zarr archive ID: {0}")]
    InvalidId(#[from] EntryNameError),

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ArchiveError {
    /// The per-file validation failures, if this error is a failed commit
    /// validation
    pub fn validation_errors(&self) -> Option<&[ValidationError]> {
        match self {
            ArchiveError::Commit(CommitError::Validation(errs)) => Some(errs),
            _ => None,
        }
    }
}
