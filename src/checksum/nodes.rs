use crate::errors::EntryNameError;
use crate::zarr::{is_path_name, EntryPath};
use enum_dispatch::enum_dispatch;

/// Trait for behavior shared by [`FileChecksum`] and [`DirChecksum`]
#[enum_dispatch]
pub trait Checksum {
    /// Return the name of the entry within its directory
    fn name(&self) -> &str;

    /// Return the digest for the file or directory
    fn digest(&self) -> &str;

    /// Consume the entry and return the digest for the file or directory
    fn into_digest(self) -> String;

    /// Return the size of the file or the total size of all files within the
    /// directory
    fn size(&self) -> u64;

    /// Return the number of files within the directory, or 1 for a
    /// [`FileChecksum`]
    fn file_count(&self) -> u64;
}

/// The checksum of a single chunk file: its object storage etag and size
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct FileChecksum {
    pub(super) name: String,
    pub(super) digest: String,
    pub(super) size: u64,
}

impl FileChecksum {
    pub fn new<S: Into<String>, D: Into<String>>(
        name: S,
        digest: D,
        size: u64,
    ) -> Result<Self, EntryNameError> {
        let name = name.into();
        if !is_path_name(&name) {
            return Err(EntryNameError(name));
        }
        Ok(FileChecksum {
            name,
            digest: digest.into(),
            size,
        })
    }

    /// Construct the entry for the file at `path` within its parent directory
    pub(crate) fn for_path(path: &EntryPath, digest: String, size: u64) -> Self {
        FileChecksum {
            name: path.file_name().to_owned(),
            digest,
            size,
        }
    }
}

impl Checksum for FileChecksum {
    fn name(&self) -> &str {
        &self.name
    }

    fn digest(&self) -> &str {
        &self.digest
    }

    fn into_digest(self) -> String {
        self.digest
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn file_count(&self) -> u64 {
        1
    }
}

/// The checksum of a subdirectory, carrying the aggregates of its whole
/// subtree
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DirChecksum {
    pub(super) name: String,
    pub(super) digest: String,
    pub(super) size: u64,
    pub(super) file_count: u64,
}

impl DirChecksum {
    /// Construct a directory entry from its name and a directory digest of
    /// the form `{md5}-{file_count}--{size}`, from which the aggregates are
    /// taken
    pub fn from_digest<S: Into<String>, D: Into<String>>(
        name: S,
        digest: D,
    ) -> Result<Self, DirChecksumError> {
        let name = name.into();
        if !is_path_name(&name) {
            return Err(DirChecksumError::Name(EntryNameError(name)));
        }
        let digest = digest.into();
        let Some(parsed) = DirDigest::parse(&digest) else {
            return Err(DirChecksumError::Digest(digest));
        };
        Ok(DirChecksum {
            name,
            size: parsed.size,
            file_count: parsed.file_count,
            digest,
        })
    }
}

impl Checksum for DirChecksum {
    fn name(&self) -> &str {
        &self.name
    }

    fn digest(&self) -> &str {
        &self.digest
    }

    fn into_digest(self) -> String {
        self.digest
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn file_count(&self) -> u64 {
        self.file_count
    }
}

/// Error returned by [`DirChecksum::from_digest()`]
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum DirChecksumError {
    #[error(transparent)]
    Name(#[from] EntryNameError),
    #[error("malformed directory digest {0:?}")]
    Digest(String),
}

/// An enum of [`FileChecksum`] and [`DirChecksum`]
#[enum_dispatch(Checksum)]
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum EntryChecksum {
    File(FileChecksum),
    Directory(DirChecksum),
}

impl EntryChecksum {
    /// True iff this entry represents a directory checksum
    pub fn is_dir(&self) -> bool {
        matches!(self, EntryChecksum::Directory(_))
    }

    /// True iff this entry represents a file checksum
    pub fn is_file(&self) -> bool {
        matches!(self, EntryChecksum::File(_))
    }
}

/// The components of a directory digest
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DirDigest<'a> {
    pub md5: &'a str,
    pub file_count: u64,
    pub size: u64,
}

impl DirDigest<'_> {
    /// Split a digest of the form `{md5}-{file_count}--{size}`.  Returns
    /// `None` if `s` is not of that form.
    pub fn parse(s: &str) -> Option<DirDigest<'_>> {
        let (head, size) = s.split_once("--")?;
        let (md5, file_count) = head.split_once('-')?;
        if md5.len() != 32 || !md5.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(DirDigest {
            md5,
            file_count: parse_decimal(file_count)?,
            size: parse_decimal(size)?,
        })
    }
}

fn parse_decimal(s: &str) -> Option<u64> {
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}
