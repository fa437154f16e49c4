//! Persistence of per-directory checksum listings ("manifests") in object
//! storage
//!
//! The manifest for directory `dir` of an archive lives at
//! `{prefix}/{dir}/.checksum`, where `prefix` is the archive's manifest
//! namespace, which is kept apart from its chunk namespace.  Together the
//! manifests form a Merkle tree whose root digest is the archive's checksum.
use crate::checksum::nodes::{Checksum, DirChecksum, FileChecksum};
use crate::checksum::ChecksumListing;
use crate::errors::{ManifestError, StoreError};
use crate::store::ObjectStore;
use crate::zarr::DirPath;
use bytes::Bytes;
use log::debug;
use serde::{Deserialize, Serialize};
use termtree::Tree;

/// Name of the manifest object within each directory's key prefix
pub const MANIFEST_FILENAME: &str = ".checksum";

/// Reads & writes the checksum manifests of one archive
#[derive(Clone, Debug)]
pub struct ChecksumFileStore<'a, S> {
    store: &'a S,
    prefix: String,
}

impl<'a, S: ObjectStore> ChecksumFileStore<'a, S> {
    pub fn new<P: Into<String>>(store: &'a S, prefix: P) -> Self {
        ChecksumFileStore {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn manifest_key(&self, dir: &DirPath) -> String {
        format!("{}/{MANIFEST_FILENAME}", dir.under(&self.prefix))
    }

    /// Read the listing for `dir`, or `None` if it has no manifest
    pub fn read_checksum_file(&self, dir: &DirPath) -> Result<Option<ChecksumListing>, ManifestError> {
        let key = self.manifest_key(dir);
        match self.store.get_object(&key) {
            Ok(body) => decode_manifest(&key, &body).map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the manifest for `dir` with `listing`
    pub fn write_checksum_file(
        &self,
        dir: &DirPath,
        listing: &ChecksumListing,
    ) -> Result<(), ManifestError> {
        let key = self.manifest_key(dir);
        let body = encode_manifest(listing).map_err(|e| ManifestError::corrupt(&key, e))?;
        debug!("Writing manifest for {dir} ({})", listing.digest());
        self.store.put_object(&key, body)?;
        Ok(())
    }

    pub fn delete_checksum_file(&self, dir: &DirPath) -> Result<(), ManifestError> {
        debug!("Deleting manifest for {dir}");
        self.store.delete_object(&self.manifest_key(dir))?;
        Ok(())
    }

    /// List the keys of every manifest currently stored for the archive
    pub fn manifest_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .store
            .list_prefix(&format!("{}/", self.prefix))?
            .into_iter()
            .map(|e| e.key)
            .filter(|k| k.ends_with(&format!("/{MANIFEST_FILENAME}")))
            .collect())
    }

    /// Render the archive's manifest tree, starting from the root manifest,
    /// for display
    pub fn render_tree(&self) -> Result<Tree<String>, ManifestError> {
        let listing = self.read_checksum_file(&DirPath::Root)?.unwrap_or_default();
        self.render_dir(&DirPath::Root, &listing)
    }

    fn render_dir(&self, dir: &DirPath, listing: &ChecksumListing) -> Result<Tree<String>, ManifestError> {
        let mut tree = Tree::new(format!(
            "{} [{}]",
            dir.name().unwrap_or("/"),
            listing.digest()
        ));
        for d in listing.directories() {
            let subdir = DirPath::Path(
                dir.join1(d.name())
                    .map_err(|e| ManifestError::corrupt(self.manifest_key(dir), e))?,
            );
            let Some(sublisting) = self.read_checksum_file(&subdir)? else {
                return Err(ManifestError::corrupt(
                    self.manifest_key(&subdir),
                    "manifest is listed in its parent but does not exist",
                ));
            };
            if sublisting.digest() != d.digest() {
                return Err(ManifestError::corrupt(
                    self.manifest_key(&subdir),
                    format!(
                        "digest {} does not match parent's entry {}",
                        sublisting.digest(),
                        d.digest()
                    ),
                ));
            }
            tree.push(self.render_dir(&subdir, &sublisting)?);
        }
        for f in listing.files() {
            tree.push(Tree::new(format!("{} [{}]", f.name(), f.digest())));
        }
        Ok(tree)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
struct ManifestDocument {
    checksums: ManifestEntries,
    digest: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
struct ManifestEntries {
    directories: Vec<ManifestEntry>,
    files: Vec<ManifestEntry>,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
struct ManifestEntry {
    digest: String,
    name: String,
    size: u64,
}

impl ManifestEntry {
    fn new<C: Checksum>(chksum: &C) -> Self {
        ManifestEntry {
            digest: chksum.digest().to_owned(),
            name: chksum.name().to_owned(),
            size: chksum.size(),
        }
    }
}

fn encode_manifest(listing: &ChecksumListing) -> Result<Bytes, serde_json::Error> {
    let doc = ManifestDocument {
        checksums: ManifestEntries {
            directories: listing.directories().iter().map(ManifestEntry::new).collect(),
            files: listing.files().iter().map(ManifestEntry::new).collect(),
        },
        digest: listing.digest().to_owned(),
    };
    serde_json::to_vec(&doc).map(Bytes::from)
}

fn decode_manifest(key: &str, body: &[u8]) -> Result<ChecksumListing, ManifestError> {
    let doc = serde_json::from_slice::<ManifestDocument>(body)
        .map_err(|e| ManifestError::corrupt(key, e))?;
    let mut files = Vec::with_capacity(doc.checksums.files.len());
    for entry in doc.checksums.files {
        files.push(
            FileChecksum::new(entry.name, entry.digest, entry.size)
                .map_err(|e| ManifestError::corrupt(key, e))?,
        );
    }
    let mut directories = Vec::with_capacity(doc.checksums.directories.len());
    for entry in doc.checksums.directories {
        let d = DirChecksum::from_digest(entry.name, entry.digest)
            .map_err(|e| ManifestError::corrupt(key, e))?;
        if d.size() != entry.size {
            return Err(ManifestError::corrupt(
                key,
                format!(
                    "directory {:?} has size {} but its digest says {}",
                    d.name(),
                    entry.size,
                    d.size()
                ),
            ));
        }
        directories.push(d);
    }
    let listing =
        ChecksumListing::generate(files, directories).map_err(|e| ManifestError::corrupt(key, e))?;
    if listing.digest() != doc.digest {
        return Err(ManifestError::corrupt(
            key,
            format!(
                "stored digest {} does not match entries' digest {}",
                doc.digest,
                listing.digest()
            ),
        ));
    }
    Ok(listing)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::MemoryStore;
    use crate::zarr::EntryPath;
    use assert_matches::assert_matches;

    fn sample_listing() -> ChecksumListing {
        ChecksumListing::generate(
            [FileChecksum::new("baz", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", 1).unwrap()],
            [DirChecksum::from_digest("bar", "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb-1--1").unwrap()],
        )
        .unwrap()
    }

    fn foo() -> DirPath {
        DirPath::from(EntryPath::try_from("foo").unwrap())
    }

    #[test]
    fn test_manifest_key() {
        let store = MemoryStore::new();
        let manifests = ChecksumFileStore::new(&store, "zarr-checksums/abc");
        assert_eq!(
            manifests.manifest_key(&DirPath::Root),
            "zarr-checksums/abc/.checksum"
        );
        let dir = DirPath::from(EntryPath::try_from("foo/bar").unwrap());
        assert_eq!(
            manifests.manifest_key(&dir),
            "zarr-checksums/abc/foo/bar/.checksum"
        );
    }

    #[test]
    fn test_write_then_read() {
        let store = MemoryStore::new();
        let manifests = ChecksumFileStore::new(&store, "zarr-checksums/abc");
        assert_eq!(manifests.read_checksum_file(&foo()).unwrap(), None);
        let listing = sample_listing();
        manifests.write_checksum_file(&foo(), &listing).unwrap();
        assert_eq!(
            manifests.read_checksum_file(&foo()).unwrap(),
            Some(listing)
        );
        assert_eq!(
            manifests.manifest_keys().unwrap(),
            ["zarr-checksums/abc/foo/.checksum"]
        );
        manifests.delete_checksum_file(&foo()).unwrap();
        assert_eq!(manifests.read_checksum_file(&foo()).unwrap(), None);
    }

    #[test]
    fn test_document_layout() {
        let store = MemoryStore::new();
        let manifests = ChecksumFileStore::new(&store, "zarr-checksums/abc");
        manifests
            .write_checksum_file(&DirPath::Root, &sample_listing())
            .unwrap();
        let body = store.get_object("zarr-checksums/abc/.checksum").unwrap();
        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            r#"{"checksums":{"directories":[{"digest":"bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb-1--1","name":"bar","size":1}],"files":[{"digest":"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa","name":"baz","size":1}]},"digest":"d5e4eb5dc8efdb54ff089db1eef34119-2--2"}"#
        );
    }

    #[test]
    fn test_read_unparseable() {
        let store = MemoryStore::new();
        store
            .put_object("zarr-checksums/abc/foo/.checksum", Bytes::from_static(b"{\"checksums\":"))
            .unwrap();
        let manifests = ChecksumFileStore::new(&store, "zarr-checksums/abc");
        assert_matches!(
            manifests.read_checksum_file(&foo()),
            Err(ManifestError::Corrupt { key, .. }) if key == "zarr-checksums/abc/foo/.checksum"
        );
    }

    #[test]
    fn test_read_tampered_digest() {
        let store = MemoryStore::new();
        let doc = r#"{"checksums":{"directories":[],"files":[{"digest":"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa","name":"baz","size":2}]},"digest":"f21b9b4bf53d7ce1167bcfae76371e59-1--1"}"#;
        store
            .put_object("zarr-checksums/abc/foo/.checksum", Bytes::from_static(doc.as_bytes()))
            .unwrap();
        let manifests = ChecksumFileStore::new(&store, "zarr-checksums/abc");
        assert_matches!(
            manifests.read_checksum_file(&foo()),
            Err(ManifestError::Corrupt { .. })
        );
    }

    #[test]
    fn test_read_directory_size_mismatch() {
        let store = MemoryStore::new();
        let doc = r#"{"checksums":{"directories":[{"digest":"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-1--1","name":"bar","size":5}],"files":[]},"digest":"ea8b8290b69b96422a3ed1cca0390f21-1--1"}"#;
        store
            .put_object("zarr-checksums/abc/foo/.checksum", Bytes::from_static(doc.as_bytes()))
            .unwrap();
        let manifests = ChecksumFileStore::new(&store, "zarr-checksums/abc");
        assert_matches!(
            manifests.read_checksum_file(&foo()),
            Err(ManifestError::Corrupt { reason, .. }) if reason.contains("size")
        );
    }

    #[test]
    fn test_read_duplicate_entries() {
        let store = MemoryStore::new();
        let doc = r#"{"checksums":{"directories":[],"files":[{"digest":"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa","name":"baz","size":1},{"digest":"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa","name":"baz","size":1}]},"digest":"f21b9b4bf53d7ce1167bcfae76371e59-1--1"}"#;
        store
            .put_object("zarr-checksums/abc/foo/.checksum", Bytes::from_static(doc.as_bytes()))
            .unwrap();
        let manifests = ChecksumFileStore::new(&store, "zarr-checksums/abc");
        assert_matches!(
            manifests.read_checksum_file(&foo()),
            Err(ManifestError::Corrupt { .. })
        );
    }

    #[test]
    fn test_render_tree() {
        let store = MemoryStore::new();
        let manifests = ChecksumFileStore::new(&store, "zarr-checksums/abc");
        let inner = ChecksumListing::generate(
            [FileChecksum::new("bar.txt", "4047c27f3c0c64f29c48361443fb1397", 31).unwrap()],
            [],
        )
        .unwrap();
        let root = ChecksumListing::generate([], [inner.to_dir_checksum("foo")]).unwrap();
        manifests.write_checksum_file(&foo(), &inner).unwrap();
        manifests.write_checksum_file(&DirPath::Root, &root).unwrap();
        let rendered = manifests.render_tree().unwrap().to_string();
        let lines = rendered.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], format!("/ [{}]", root.digest()));
        assert!(lines[1].ends_with(&format!("foo [{}]", inner.digest())));
        assert!(lines[2].ends_with("bar.txt [4047c27f3c0c64f29c48361443fb1397]"));
    }

    #[test]
    fn test_render_tree_missing_child() {
        let store = MemoryStore::new();
        let manifests = ChecksumFileStore::new(&store, "zarr-checksums/abc");
        let root = ChecksumListing::generate(
            [],
            [DirChecksum::from_digest("foo", "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb-1--1").unwrap()],
        )
        .unwrap();
        manifests.write_checksum_file(&DirPath::Root, &root).unwrap();
        assert_matches!(manifests.render_tree(), Err(ManifestError::Corrupt { .. }));
    }
}
