use super::json::get_checksum_json;
use super::nodes::*;
use crate::errors::ListingError;
use crate::util::md5_string;
use log::debug;
use std::cmp::Ordering;

/// The canonical contents of one directory's checksum manifest: its file and
/// subdirectory entries, each sorted by name, together with the digest
/// computed over them and the aggregate size & file count of the whole
/// subtree.
///
/// Listings are immutable; a changed directory gets a freshly
/// [generated][ChecksumListing::generate] listing.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ChecksumListing {
    files: Vec<FileChecksum>,
    directories: Vec<DirChecksum>,
    digest: String,
    size: u64,
    file_count: u64,
}

impl ChecksumListing {
    /// Build the listing for a directory with the given entries.
    ///
    /// The order of the input does not matter.  Subdirectories with no files
    /// in them are omitted, as such directories cannot exist in object
    /// storage.
    ///
    /// # Errors
    ///
    /// Fails if two files or two directories share a name, or if a name is
    /// used for both a file and a directory.
    pub fn generate<F, D>(files: F, directories: D) -> Result<ChecksumListing, ListingError>
    where
        F: IntoIterator<Item = FileChecksum>,
        D: IntoIterator<Item = DirChecksum>,
    {
        let mut files = files.into_iter().collect::<Vec<_>>();
        files.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        check_unique(&files)?;
        let mut directories = directories
            .into_iter()
            .filter(|d| d.file_count > 0)
            .collect::<Vec<_>>();
        directories.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        check_unique(&directories)?;
        check_disjoint(&files, &directories)?;
        let size = files.iter().map(Checksum::size).sum::<u64>()
            + directories.iter().map(Checksum::size).sum::<u64>();
        let file_count = files.iter().map(Checksum::file_count).sum::<u64>()
            + directories.iter().map(Checksum::file_count).sum::<u64>();
        let md5 = md5_string(&get_checksum_json(&files, &directories));
        let digest = format!("{md5}-{file_count}--{size}");
        debug!(
            "Computed digest for listing of {} files and {} directories: {digest}",
            files.len(),
            directories.len()
        );
        Ok(ChecksumListing {
            files,
            directories,
            digest,
            size,
            file_count,
        })
    }

    /// The listing of a directory with no entries, whose digest is
    /// [`EMPTY_CHECKSUM`][super::EMPTY_CHECKSUM]
    pub fn empty() -> ChecksumListing {
        ChecksumListing {
            files: Vec::new(),
            directories: Vec::new(),
            digest: String::from(super::EMPTY_CHECKSUM),
            size: 0,
            file_count: 0,
        }
    }

    pub fn files(&self) -> &[FileChecksum] {
        &self.files
    }

    pub fn directories(&self) -> &[DirChecksum] {
        &self.directories
    }

    /// Iterate over all entries, directories first
    pub fn entries(&self) -> impl Iterator<Item = EntryChecksum> + '_ {
        self.directories
            .iter()
            .cloned()
            .map(EntryChecksum::from)
            .chain(self.files.iter().cloned().map(EntryChecksum::from))
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn into_digest(self) -> String {
        self.digest
    }

    /// Total size in bytes of all files in the subtree
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of files in the subtree
    pub fn file_count(&self) -> u64 {
        self.file_count
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.directories.is_empty()
    }

    /// Look up the file entry with the given name
    pub fn file(&self, name: &str) -> Option<&FileChecksum> {
        self.files
            .binary_search_by(|f| f.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.files[i])
    }

    /// Look up the subdirectory entry with the given name
    pub fn directory(&self, name: &str) -> Option<&DirChecksum> {
        self.directories
            .binary_search_by(|d| d.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.directories[i])
    }

    /// Return the entry under which this listing's directory appears in its
    /// parent's listing
    pub fn to_dir_checksum(&self, name: &str) -> DirChecksum {
        DirChecksum {
            name: String::from(name),
            digest: self.digest.clone(),
            size: self.size,
            file_count: self.file_count,
        }
    }

    /// Return the canonical serialization over which the digest is computed
    pub fn canonical_json(&self) -> String {
        get_checksum_json(&self.files, &self.directories)
    }
}

impl Default for ChecksumListing {
    fn default() -> Self {
        ChecksumListing::empty()
    }
}

fn check_unique<C: Checksum>(sorted: &[C]) -> Result<(), ListingError> {
    match sorted.windows(2).find(|w| w[0].name() == w[1].name()) {
        Some(w) => Err(ListingError::DuplicateName {
            name: w[0].name().to_owned(),
        }),
        None => Ok(()),
    }
}

fn check_disjoint(files: &[FileChecksum], directories: &[DirChecksum]) -> Result<(), ListingError> {
    let mut fiter = files.iter().peekable();
    let mut diter = directories.iter().peekable();
    while let (Some(f), Some(d)) = (fiter.peek(), diter.peek()) {
        match f.name.cmp(&d.name) {
            Ordering::Less => {
                fiter.next();
            }
            Ordering::Greater => {
                diter.next();
            }
            Ordering::Equal => {
                return Err(ListingError::NameConflict {
                    name: f.name.clone(),
                })
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::checksum::EMPTY_CHECKSUM;
    use assert_matches::assert_matches;

    fn file(name: &str, digest: &str, size: u64) -> FileChecksum {
        FileChecksum::new(name, digest, size).unwrap()
    }

    fn dir(name: &str, digest: &str) -> DirChecksum {
        DirChecksum::from_digest(name, digest).unwrap()
    }

    #[test]
    fn test_generate_nothing() {
        let listing = ChecksumListing::generate([], []).unwrap();
        assert_eq!(listing.digest(), EMPTY_CHECKSUM);
        assert_eq!(listing, ChecksumListing::empty());
        assert!(listing.is_empty());
    }

    #[test]
    fn test_generate_one_file() {
        let listing =
            ChecksumListing::generate([file("bar", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", 1)], [])
                .unwrap();
        assert_eq!(listing.digest(), "f21b9b4bf53d7ce1167bcfae76371e59-1--1");
    }

    #[test]
    fn test_generate_one_directory() {
        let listing = ChecksumListing::generate(
            [],
            [dir("bar", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-1--1")],
        )
        .unwrap();
        assert_eq!(listing.digest(), "ea8b8290b69b96422a3ed1cca0390f21-1--1");
    }

    #[test]
    fn test_generate_two_files() {
        let listing = ChecksumListing::generate(
            [
                file("bar", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", 1),
                file("baz", "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb", 1),
            ],
            [],
        )
        .unwrap();
        assert_eq!(listing.digest(), "8e50add2b46d3a6389e2d9d0924227fb-2--2");
    }

    #[test]
    fn test_generate_two_directories() {
        let listing = ChecksumListing::generate(
            [],
            [
                dir("bar", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-1--1"),
                dir("baz", "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb-1--1"),
            ],
        )
        .unwrap();
        assert_eq!(listing.digest(), "4c21a113688f925240549b14136d61ff-2--2");
    }

    #[test]
    fn test_generate_one_of_each() {
        let listing = ChecksumListing::generate(
            [file("baz", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", 1)],
            [dir("bar", "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb-1--1")],
        )
        .unwrap();
        assert_eq!(listing.digest(), "d5e4eb5dc8efdb54ff089db1eef34119-2--2");
        assert_eq!(listing.size(), 2);
        assert_eq!(listing.file_count(), 2);
    }

    #[test]
    fn test_generate_ignores_input_order() {
        let files = vec![
            file("c", "cccccccccccccccccccccccccccccccc", 3),
            file("a", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", 1),
            file("b", "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb", 2),
        ];
        let dirs = vec![
            dir("z", "dddddddddddddddddddddddddddddddd-2--7"),
            dir("y", "eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee-1--5"),
        ];
        let expected = ChecksumListing::generate(files.clone(), dirs.clone()).unwrap();
        let mut rfiles = files;
        rfiles.reverse();
        let mut rdirs = dirs;
        rdirs.reverse();
        for rot in 0..3 {
            rfiles.rotate_left(1);
            let listing = ChecksumListing::generate(rfiles.clone(), rdirs.clone()).unwrap();
            assert_eq!(listing, expected, "rotation {rot} differs");
            assert_eq!(listing.canonical_json(), expected.canonical_json());
        }
        assert_eq!(
            expected
                .files()
                .iter()
                .map(Checksum::name)
                .collect::<Vec<_>>(),
            ["a", "b", "c"]
        );
        assert_eq!(expected.size(), 18);
        assert_eq!(expected.file_count(), 6);
    }

    #[test]
    fn test_generate_duplicate_file() {
        let r = ChecksumListing::generate(
            [
                file("a", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", 1),
                file("b", "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb", 1),
                file("a", "cccccccccccccccccccccccccccccccc", 1),
            ],
            [],
        );
        assert_matches!(r, Err(ListingError::DuplicateName { name }) if name == "a");
    }

    #[test]
    fn test_generate_duplicate_directory() {
        let r = ChecksumListing::generate(
            [],
            [
                dir("a", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-1--1"),
                dir("a", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-1--1"),
            ],
        );
        assert_matches!(r, Err(ListingError::DuplicateName { name }) if name == "a");
    }

    #[test]
    fn test_generate_file_directory_conflict() {
        let r = ChecksumListing::generate(
            [
                file("a", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", 1),
                file("m", "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb", 1),
            ],
            [
                dir("b", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-1--1"),
                dir("m", "cccccccccccccccccccccccccccccccc-1--1"),
            ],
        );
        assert_matches!(r, Err(ListingError::NameConflict { name }) if name == "m");
    }

    #[test]
    fn test_generate_drops_empty_directories() {
        let listing = ChecksumListing::generate(
            [file("bar", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", 1)],
            [dir("quux", EMPTY_CHECKSUM)],
        )
        .unwrap();
        assert!(listing.directories().is_empty());
        assert_eq!(listing.digest(), "f21b9b4bf53d7ce1167bcfae76371e59-1--1");
    }

    #[test]
    fn test_lookup_and_to_dir_checksum() {
        let listing = ChecksumListing::generate(
            [file("baz", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", 1)],
            [dir("bar", "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb-1--1")],
        )
        .unwrap();
        assert_eq!(listing.file("baz").map(Checksum::size), Some(1));
        assert!(listing.file("bar").is_none());
        assert!(listing.directory("bar").is_some());
        assert_eq!(listing.entries().filter(EntryChecksum::is_dir).count(), 1);
        let entry = listing.to_dir_checksum("foo");
        assert_eq!(entry.name(), "foo");
        assert_eq!(entry.digest(), listing.digest());
        assert_eq!(entry.file_count(), 2);
        assert_eq!(entry.size(), 2);
    }
}
