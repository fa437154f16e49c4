use std::num::NonZeroUsize;

/// Largest number of files that may be declared in one upload session
pub const DEFAULT_MAX_UPLOAD_FILES: usize = 255;

/// Runtime settings shared by every archive managed by one
/// [`ArchiveManager`][crate::ArchiveManager]
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Config {
    /// Key prefix under which each archive's chunks are stored, as
    /// `{data_prefix}/{archive_id}/{path}`
    pub data_prefix: String,

    /// Key prefix under which each archive's checksum manifests are stored,
    /// as `{manifest_prefix}/{archive_id}/{dir}/.checksum`
    pub manifest_prefix: String,

    /// Key prefix under which clients write the files of an upload session,
    /// as `{staging_prefix}/{archive_id}/{path}`.  Files are moved to the
    /// data prefix when the session is committed.
    pub staging_prefix: String,

    /// Number of worker threads used to recompute directories in a commit
    pub threads: NonZeroUsize,

    pub max_upload_files: usize,
}

impl Config {
    pub fn archive_data_prefix(&self, id: &str) -> String {
        format!("{}/{id}", self.data_prefix)
    }

    pub fn archive_manifest_prefix(&self, id: &str) -> String {
        format!("{}/{id}", self.manifest_prefix)
    }

    pub fn archive_staging_prefix(&self, id: &str) -> String {
        format!("{}/{id}", self.staging_prefix)
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            data_prefix: String::from("zarr"),
            manifest_prefix: String::from("zarr-checksums"),
            staging_prefix: String::from("zarr-uploads"),
            threads: std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
            max_upload_files: DEFAULT_MAX_UPLOAD_FILES,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_prefixes() {
        let cfg = Config::default();
        assert_eq!(cfg.archive_data_prefix("abc"), "zarr/abc");
        assert_eq!(cfg.archive_manifest_prefix("abc"), "zarr-checksums/abc");
        assert_eq!(cfg.archive_staging_prefix("abc"), "zarr-uploads/abc");
        assert_eq!(cfg.max_upload_files, 255);
    }
}
