use super::listing::ChecksumListing;
use super::nodes::*;
use crate::errors::ChecksumTreeError;
use crate::zarr::{DirPath, EntryPath};
use std::collections::{btree_map::Entry, BTreeMap};

/// An in-memory tree of file checksums for a whole Zarr, from which the
/// listing of every directory can be computed at once
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ChecksumTree(DirTree);

#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct DirTree {
    children: BTreeMap<String, TreeNode>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum TreeNode {
    File(FileChecksum),
    Directory(DirTree),
}

impl ChecksumTree {
    pub fn new() -> Self {
        ChecksumTree::default()
    }

    pub fn add_file(
        &mut self,
        path: &EntryPath,
        digest: String,
        size: u64,
    ) -> Result<(), ChecksumTreeError> {
        let mut d = &mut self.0.children;
        for parent in path.parents() {
            match d
                .entry(parent.file_name().to_string())
                .or_insert_with(|| TreeNode::Directory(DirTree::default()))
            {
                TreeNode::File(_) => {
                    return Err(ChecksumTreeError::PathTypeConflict { path: parent })
                }
                TreeNode::Directory(DirTree { children }) => d = children,
            }
        }
        match d.entry(path.file_name().to_string()) {
            Entry::Occupied(o) => {
                return Err(match o.get() {
                    TreeNode::File(_) => ChecksumTreeError::DoubleAdd { path: path.clone() },
                    TreeNode::Directory(_) => {
                        ChecksumTreeError::PathTypeConflict { path: path.clone() }
                    }
                })
            }
            Entry::Vacant(v) => {
                v.insert(TreeNode::File(FileChecksum::for_path(path, digest, size)));
            }
        }
        Ok(())
    }

    pub fn from_files<I>(iter: I) -> Result<ChecksumTree, ChecksumTreeError>
    where
        I: IntoIterator<Item = (EntryPath, String, u64)>,
    {
        let mut zarr = ChecksumTree::new();
        for (path, digest, size) in iter {
            zarr.add_file(&path, digest, size)?;
        }
        Ok(zarr)
    }

    /// Compute the listing for the root of the tree
    pub fn checksum(&self) -> Result<ChecksumListing, ChecksumTreeError> {
        Ok(self.clone().into_listings()?.remove(&DirPath::Root).unwrap_or_default())
    }

    /// Consume the tree and compute the listing for every directory in it,
    /// keyed by directory path.  The root is always included, even when the
    /// tree is empty.
    pub fn into_listings(self) -> Result<BTreeMap<DirPath, ChecksumListing>, ChecksumTreeError> {
        let mut listings = BTreeMap::new();
        self.0.collect(DirPath::Root, &mut listings)?;
        Ok(listings)
    }
}

impl DirTree {
    fn collect(
        self,
        relpath: DirPath,
        out: &mut BTreeMap<DirPath, ChecksumListing>,
    ) -> Result<ChecksumListing, ChecksumTreeError> {
        let mut files = Vec::new();
        let mut directories = Vec::new();
        for (name, node) in self.children {
            match node {
                TreeNode::File(f) => files.push(f),
                TreeNode::Directory(sub) => {
                    let subpath = DirPath::Path(
                        relpath
                            .join1(&name)
                            .expect("tree keys should be valid path components"),
                    );
                    let listing = sub.collect(subpath, out)?;
                    directories.push(listing.to_dir_checksum(&name));
                }
            }
        }
        let listing = ChecksumListing::generate(files, directories)?;
        out.insert(relpath, listing.clone());
        Ok(listing)
    }
}
