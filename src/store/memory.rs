use super::{validate_key, ObjectEntry, ObjectInfo, ObjectStore};
use crate::errors::StoreError;
use crate::util::md5_bytes;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};

/// An [`ObjectStore`] that keeps everything in a map in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Number of objects currently stored
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Bytes>> {
        self.objects
            .lock()
            .expect("Mutex should not have been poisoned")
    }
}

impl ObjectStore for MemoryStore {
    fn put_object(&self, key: &str, body: Bytes) -> Result<(), StoreError> {
        validate_key(key)?;
        log::trace!("[MemoryStore] put {key} ({} bytes)", body.len());
        self.lock().insert(String::from(key), body);
        Ok(())
    }

    fn get_object(&self, key: &str) -> Result<Bytes, StoreError> {
        self.lock()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(key))
    }

    fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        log::trace!("[MemoryStore] delete {key}");
        self.lock().remove(key);
        Ok(())
    }

    fn head_object(&self, key: &str) -> Result<ObjectInfo, StoreError> {
        self.lock()
            .get(key)
            .map(info_for)
            .ok_or_else(|| StoreError::not_found(key))
    }

    fn presign_put(&self, key: &str) -> Result<String, StoreError> {
        validate_key(key)?;
        Ok(format!("memory:///{key}"))
    }

    fn list_prefix(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StoreError> {
        Ok(self
            .lock()
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| ObjectEntry {
                key: k.clone(),
                info: info_for(v),
            })
            .collect())
    }
}

fn info_for(body: &Bytes) -> ObjectInfo {
    ObjectInfo {
        etag: md5_bytes(body),
        size: body.len() as u64,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_put_head_get_delete() {
        let store = MemoryStore::new();
        let body = Bytes::from_static(b"Some fascinating zarr content.\n");
        store.put_object("zarr/abc/foo/bar.txt", body.clone()).unwrap();
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
        assert!(store.is_empty());
    }

    #[test]
    fn test_list_prefix() {
        let store = MemoryStore::new();
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
        assert_eq!(store.list_prefix("").unwrap().len(), 5);
    }

    #[test]
    fn test_copy_object() {
        let store = MemoryStore::new();
        store
            .put_object("zarr-uploads/abc/a.txt", Bytes::from_static(b"x"))
            .unwrap();
        store
            .copy_object("zarr-uploads/abc/a.txt", "zarr/abc/a.txt")
            .unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(
            store.head_object("zarr/abc/a.txt").unwrap(),
            store.head_object("zarr-uploads/abc/a.txt").unwrap()
        );
        assert_matches!(
            store.copy_object("zarr-uploads/abc/b.txt", "zarr/abc/b.txt"),
            Err(StoreError::NotFound { .. })
        );
    }

    #[test]
    fn test_rejects_invalid_key() {
        let store = MemoryStore::new();
        assert_matches!(
            store.put_object("zarr//abc", Bytes::new()),
            Err(StoreError::InvalidKey { .. })
        );
    }
}
