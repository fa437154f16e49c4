//! Paths of entries within a Zarr archive and the object storage keys they
//! map to
mod entrypath;
pub use entrypath::*;

/// Build the key of the chunk at `path` in an archive whose chunks live under
/// `archive_prefix`
pub fn chunk_key(archive_prefix: &str, path: &EntryPath) -> String {
    format!("{archive_prefix}/{path}")
}

/// Inverse of [`chunk_key()`]: recover the relative path of a key listed
/// under `archive_prefix`.  Returns `None` for keys outside the prefix or
/// whose remainder is not a valid [`EntryPath`].
pub fn relative_to(key: &str, archive_prefix: &str) -> Option<EntryPath> {
    key.strip_prefix(archive_prefix)?
        .strip_prefix('/')
        .and_then(|rest| EntryPath::try_from(rest).ok())
}
