use super::{validate_key, ObjectEntry, ObjectInfo, ObjectStore};
use crate::errors::StoreError;
use crate::util::md5_file;
use bytes::Bytes;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

/// An [`ObjectStore`] that maps each key onto a file beneath a root
/// directory.  Each `/`-separated key segment becomes one path component.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        LocalStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        let mut path = self.root.clone();
        path.extend(key.split('/'));
        Ok(path)
    }

    fn walk(&self, dirpath: &Path, keyprefix: &str, out: &mut Vec<ObjectEntry>) -> io::Result<()> {
        let handle = match fs_err::read_dir(dirpath) {
            Ok(h) => h,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        for p in handle {
            let p = p?;
            let Ok(name) = p.file_name().into_string() else {
                log::warn!("Skipping undecodable filename in {}", dirpath.display());
                continue;
            };
            let key = if keyprefix.is_empty() {
                name
            } else {
                format!("{keyprefix}/{name}")
            };
            let path = p.path();
            if p.file_type()?.is_dir() {
                self.walk(&path, &key, out)?;
            } else {
                let size = fs_err::metadata(&path)?.len();
                let etag = md5_file(&path)?;
                out.push(ObjectEntry {
                    key,
                    info: ObjectInfo { etag, size },
                });
            }
        }
        Ok(())
    }
}

impl ObjectStore for LocalStore {
    fn put_object(&self, key: &str, body: Bytes) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent).map_err(|e| StoreError::io(key, e))?;
        }
        fs_err::write(&path, &body).map_err(|e| StoreError::io(key, e))
    }

    fn get_object(&self, key: &str) -> Result<Bytes, StoreError> {
        let path = self.path_for(key)?;
        match fs_err::read(&path) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) => Err(map_not_found(key, e)),
        }
    }

    fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs_err::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    fn head_object(&self, key: &str) -> Result<ObjectInfo, StoreError> {
        let path = self.path_for(key)?;
        let md = fs_err::metadata(&path).map_err(|e| map_not_found(key, e))?;
        if !md.is_file() {
            return Err(StoreError::not_found(key));
        }
        let etag = md5_file(&path).map_err(|e| map_not_found(key, e))?;
        Ok(ObjectInfo {
            etag,
            size: md.len(),
        })
    }

    fn presign_put(&self, key: &str) -> Result<String, StoreError> {
        let path = self.path_for(key)?;
        Ok(format!("file://{}", path.display()))
    }

    fn list_prefix(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StoreError> {
        // Only descend into the deepest directory named in full by `prefix`
        let (dirkey, _) = prefix.rsplit_once('/').unwrap_or(("", prefix));
        let dirpath = if dirkey.is_empty() {
            self.root.clone()
        } else {
            self.path_for(dirkey)?
        };
        let mut entries = Vec::new();
        self.walk(&dirpath, dirkey, &mut entries)
            .map_err(|e| StoreError::io(prefix, e))?;
        entries.retain(|e| e.key.starts_with(prefix));
        entries.sort_unstable_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    fn copy_object(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let src = self.path_for(from)?;
        let dest = self.path_for(to)?;
        if !fs_err::metadata(&src)
            .map_err(|e| map_not_found(from, e))?
            .is_file()
        {
            return Err(StoreError::not_found(from));
        }
        if let Some(parent) = dest.parent() {
            fs_err::create_dir_all(parent).map_err(|e| StoreError::io(to, e))?;
        }
        fs_err::copy(&src, &dest).map_err(|e| StoreError::io(to, e))?;
        Ok(())
    }
}

fn map_not_found(key: &str, e: io::Error) -> StoreError {
    if e.kind() == ErrorKind::NotFound {
        StoreError::not_found(key)
    } else {
        StoreError::io(key, e)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::tempdir;

    #[test]
    fn test_put_head_get_delete() {
        let tmp = tempdir().unwrap();
        let store = LocalStore::new(tmp.path());
        let body = Bytes::from_static(b"Some fascinating zarr content.\n");
        store.put_object("zarr/abc/foo/bar.txt", body.clone()).unwrap();
        assert!(tmp.path().join("zarr").join("abc").join("foo").join("bar.txt").is_file());
        assert_eq!(
            store.head_object("zarr/abc/foo/bar.txt").unwrap(),
            ObjectInfo {
                etag: "4047c27f3c0c64f29c48361443fb1397".into(),
                size: 31,
            }
        );
        assert_eq!(store.get_object("zarr/abc/foo/bar.txt").unwrap(), body);
        store.delete_object("zarr/abc/foo/bar.txt").unwrap();
        assert_matches!(
            store.head_object("zarr/abc/foo/bar.txt"),
            Err(StoreError::NotFound { .. })
        );
        assert_matches!(
            store.get_object("zarr/abc/foo/bar.txt"),
            Err(StoreError::NotFound { .. })
        );
        store.delete_object("zarr/abc/foo/bar.txt").unwrap();
    }

    #[test]
    fn test_head_directory_is_not_found() {
        let tmp = tempdir().unwrap();
        let store = LocalStore::new(tmp.path());
        store.put_object("zarr/abc/foo/bar.txt", Bytes::new()).unwrap();
        assert_matches!(
            store.head_object("zarr/abc/foo"),
            Err(StoreError::NotFound { .. })
        );
    }

    #[test]
    fn test_list_prefix() {
        let tmp = tempdir().unwrap();
        let store = LocalStore::new(tmp.path());
        for key in ["zarr/ab/x", "zarr/abc/1", "zarr/abc/2/3", "zarr/abd/4", "zarr2/abc/5"] {
            store.put_object(key, Bytes::from_static(b"x")).unwrap();
        }
        let keys = store
            .list_prefix("zarr/abc/")
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect::<Vec<_>>();
        assert_eq!(keys, ["zarr/abc/1", "zarr/abc/2/3"]);
        let keys = store
            .list_prefix("zarr/ab")
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect::<Vec<_>>();
        assert_eq!(keys, ["zarr/ab/x", "zarr/abc/1", "zarr/abc/2/3", "zarr/abd/4"]);
        assert_eq!(store.list_prefix("").unwrap().len(), 5);
        assert!(store.list_prefix("nonexistent/").unwrap().is_empty());
    }

    #[test]
    fn test_copy_object() {
        let tmp = tempdir().unwrap();
        let store = LocalStore::new(tmp.path());
        store
            .put_object("zarr-uploads/abc/a.txt", Bytes::from_static(b"x"))
            .unwrap();
        store
            .copy_object("zarr-uploads/abc/a.txt", "zarr/abc/b/a.txt")
            .unwrap();
        assert_eq!(
            store.get_object("zarr/abc/b/a.txt").unwrap(),
            Bytes::from_static(b"x")
        );
        assert!(store.head_object("zarr-uploads/abc/a.txt").is_ok());
        assert_matches!(
            store.copy_object("zarr-uploads/abc/missing", "zarr/abc/missing"),
            Err(StoreError::NotFound { .. })
        );
        assert_matches!(
            store.copy_object("zarr-uploads/abc", "zarr/abc/dir"),
            Err(StoreError::NotFound { .. })
        );
    }

    #[test]
    fn test_presign_put() {
        let tmp = tempdir().unwrap();
        let store = LocalStore::new(tmp.path());
        let url = store.presign_put("zarr/abc/foo").unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("foo"));
        assert_matches!(
            store.presign_put("zarr/../etc"),
            Err(StoreError::InvalidKey { .. })
        );
    }
}
