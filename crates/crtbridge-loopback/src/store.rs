//! In-memory object store backing the loopback engine.
//!
//! Objects are keyed by request path (`/bucket/key`) and carry an MD5 ETag
//! computed at write time. [`ObjectStore`] uses [`DashMap`] so engine tasks
//! and test code can read and write concurrently.

use bytes::Bytes;
use dashmap::DashMap;
use md5::{Digest, Md5};
use tracing::debug;

/// Content type recorded when a write does not name one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Compute the quoted hex MD5 of `data`, as used for ETags.
///
/// # Examples
///
/// ```
/// use crtbridge_loopback::store::compute_etag;
///
/// assert_eq!(compute_etag(b""), "\"d41d8cd98f00b204e9800998ecf8427e\"");
/// ```
#[must_use]
pub fn compute_etag(data: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Md5::digest(data)))
}

/// A stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Object content.
    pub data: Bytes,
    /// Quoted hex MD5 of `data`.
    pub etag: String,
    /// Content type given at write time.
    pub content_type: String,
}

/// Thread-safe object map.
#[derive(Debug, Default)]
pub struct ObjectStore {
    objects: DashMap<String, StoredObject>,
}

impl ObjectStore {
    /// Store `data` under `key`, replacing any previous object. Returns the
    /// ETag.
    pub fn put(&self, key: &str, data: Bytes, content_type: Option<&str>) -> String {
        let etag = compute_etag(&data);
        debug!(key, size = data.len(), %etag, "storing object");
        self.objects.insert(
            key.to_owned(),
            StoredObject {
                data,
                etag: etag.clone(),
                content_type: content_type.unwrap_or(DEFAULT_CONTENT_TYPE).to_owned(),
            },
        );
        etag
    }

    /// The object under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.get(key).map(|entry| entry.value().clone())
    }

    /// Copy `source` to `destination`. Returns the new ETag, or `None` if
    /// the source does not exist.
    pub fn copy(&self, source: &str, destination: &str) -> Option<String> {
        let object = self.get(source)?;
        debug!(source, destination, "copying object");
        let etag = object.etag.clone();
        self.objects.insert(destination.to_owned(), object);
        Some(etag)
    }

    /// Remove `key`. Returns whether an object was removed.
    pub fn remove(&self, key: &str) -> bool {
        self.objects.remove(key).is_some()
    }

    /// Sorted keys of every stored object.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_store_objects_with_md5_etag() {
        let store = ObjectStore::default();
        let etag = store.put("/bucket/hello", Bytes::from_static(b"hello"), None);
        assert_eq!(etag, "\"5d41402abc4b2a76b9719d911017c592\"");

        let object = store.get("/bucket/hello").unwrap();
        assert_eq!(object.data, Bytes::from_static(b"hello"));
        assert_eq!(object.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_should_copy_and_remove_objects() {
        let store = ObjectStore::default();
        store.put("/bucket/a", Bytes::from_static(b"data"), Some("text/plain"));

        assert_eq!(store.copy("/bucket/missing", "/bucket/b"), None);
        let etag = store.copy("/bucket/a", "/bucket/b").unwrap();
        assert_eq!(etag, compute_etag(b"data"));
        assert_eq!(store.get("/bucket/b").unwrap().content_type, "text/plain");
        assert_eq!(store.keys(), vec!["/bucket/a", "/bucket/b"]);

        assert!(store.remove("/bucket/a"));
        assert!(!store.remove("/bucket/a"));
        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
    }
}
