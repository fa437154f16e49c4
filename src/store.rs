//! Flat key/value object storage in which Zarr chunks and checksum manifests
//! are kept
//!
//! Keys are `/`-separated strings; any hierarchy is a naming convention of
//! the caller.
mod local;
mod memory;
pub use self::local::*;
pub use self::memory::*;
use crate::errors::StoreError;
use bytes::Bytes;
use std::fmt;

/// What object storage reports about a stored object without fetching it
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ObjectInfo {
    /// Hex MD5 digest of the object's content, as computed by the store when
    /// the object was written
    pub etag: String,
    pub size: u64,
}

/// An object returned by [`ObjectStore::list_prefix()`]
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ObjectEntry {
    pub key: String,
    pub info: ObjectInfo,
}

pub trait ObjectStore: fmt::Debug + Send + Sync {
    /// Store `body` at `key`, replacing any existing object
    fn put_object(&self, key: &str, body: Bytes) -> Result<(), StoreError>;

    /// Fetch the object at `key`.  Fails with [`StoreError::NotFound`] if
    /// there is no such object.
    fn get_object(&self, key: &str) -> Result<Bytes, StoreError>;

    /// Delete the object at `key`.  Deleting a nonexistent object succeeds.
    fn delete_object(&self, key: &str) -> Result<(), StoreError>;

    /// Fetch the etag & size of the object at `key`.  Fails with
    /// [`StoreError::NotFound`] if there is no such object.
    fn head_object(&self, key: &str) -> Result<ObjectInfo, StoreError>;

    /// Return a URL to which a client can write the object at `key` directly
    fn presign_put(&self, key: &str) -> Result<String, StoreError>;

    /// List every object whose key starts with `prefix`, sorted by key
    fn list_prefix(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StoreError>;

    /// Copy the object at `from` to `to`, replacing any object already there.
    /// Fails with [`StoreError::NotFound`] if there is no object at `from`.
    fn copy_object(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let body = self.get_object(from)?;
        self.put_object(to, body)
    }
}

impl<T: ObjectStore + ?Sized> ObjectStore for &T {
    fn put_object(&self, key: &str, body: Bytes) -> Result<(), StoreError> {
        (**self).put_object(key, body)
    }

    fn get_object(&self, key: &str) -> Result<Bytes, StoreError> {
        (**self).get_object(key)
    }

    fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete_object(key)
    }

    fn head_object(&self, key: &str) -> Result<ObjectInfo, StoreError> {
        (**self).head_object(key)
    }

    fn presign_put(&self, key: &str) -> Result<String, StoreError> {
        (**self).presign_put(key)
    }

    fn list_prefix(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StoreError> {
        (**self).list_prefix(prefix)
    }

    fn copy_object(&self, from: &str, to: &str) -> Result<(), StoreError> {
        (**self).copy_object(from, to)
    }
}

/// Ensure that `key` is usable as an object key: nonempty, no leading or
/// trailing slash, and no empty, `.`, or `..` segments
pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    if key
        .split('/')
        .all(|seg| !seg.is_empty() && seg != "." && seg != "..")
    {
        Ok(())
    } else {
        Err(StoreError::InvalidKey {
            key: String::from(key),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("zarr/abc/foo", true)]
    #[case("zarr-checksums/abc/.checksum", true)]
    #[case("", false)]
    #[case("/zarr", false)]
    #[case("zarr/", false)]
    #[case("zarr//abc", false)]
    #[case("zarr/../abc", false)]
    fn test_validate_key(#[case] key: &str, #[case] ok: bool) {
        assert_eq!(validate_key(key).is_ok(), ok);
    }
}
