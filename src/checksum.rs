//! Dandi Zarr checksums of files and directory listings
//!
//! A file's checksum is its object storage etag.  A directory's checksum is
//! `{md5}-{file_count}--{size}`, where `md5` is the MD5 of the canonical JSON
//! serialization of the directory's entries and the other two fields are the
//! totals over the directory's entire subtree.
mod json;
mod listing;
pub mod nodes;
mod tree;
pub use self::listing::*;
pub use self::tree::*;

/// The checksum of a directory with no entries, and thus of a Zarr archive
/// to which nothing has been uploaded yet
pub const EMPTY_CHECKSUM: &str = "481a2f77ab786a0f45aafd5db0971caa-0--0";

/// Check a client-declared file digest against the etag that object storage
/// reports for the uploaded object.  No bytes are hashed here; the storage
/// backend computed the etag when the object was written.
pub fn digest_matches(declared: &str, actual: &str) -> bool {
    // Some S3 implementations quote their ETags.
    declared.trim_matches('"').eq_ignore_ascii_case(actual.trim_matches('"'))
}
