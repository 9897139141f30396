//! In-memory blob store used by tests and single-process setups.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::error::BlobError;
use crate::store::{BlobStore, ListPage, ListedObject, ObjectMeta};

const LIST_PAGE_SIZE: usize = 1000;

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, Bytes>,
    generation: u64,
    uploads: HashMap<String, HashMap<u32, Bytes>>,
}

/// Blob store backed by process memory. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBlobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Raw object bytes, for test assertions.
    #[must_use]
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.lock().objects.get(key).cloned()
    }

    /// Number of stored objects, for test assertions.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, BlobError> {
        let inner = self.lock();
        Ok(inner.objects.get(key).map(|data| ObjectMeta {
            size: data.len() as u64,
            etag: format!("{:x}-{:x}", data.len(), inner.generation),
        }))
    }

    async fn get_range(&self, key: &str, offset: u64, len: u64) -> Result<Bytes, BlobError> {
        let inner = self.lock();
        let data = inner.objects.get(key).ok_or_else(|| BlobError::NotFound {
            key: key.to_string(),
        })?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let end = usize::try_from(offset.saturating_add(len))
            .unwrap_or(usize::MAX)
            .min(data.len());
        Ok(data.slice(start..end))
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<(), BlobError> {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn create_multipart(&self, _key: &str) -> Result<String, BlobError> {
        let upload_id = Uuid::new_v4().to_string();
        self.lock().uploads.insert(upload_id.clone(), HashMap::new());
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<(), BlobError> {
        let mut inner = self.lock();
        let parts = inner
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| BlobError::UnknownUpload {
                upload_id: upload_id.to_string(),
            })?;
        parts.insert(part_number, data);
        Ok(())
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> Result<(), BlobError> {
        let mut inner = self.lock();
        let parts = inner
            .uploads
            .remove(upload_id)
            .ok_or_else(|| BlobError::UnknownUpload {
                upload_id: upload_id.to_string(),
            })?;
        let mut assembled = Vec::new();
        for &part_number in part_numbers {
            let part = parts.get(&part_number).ok_or(BlobError::MissingPart {
                upload_id: upload_id.to_string(),
                part_number,
            })?;
            assembled.extend_from_slice(part);
        }
        inner.generation += 1;
        inner.objects.insert(key.to_string(), Bytes::from(assembled));
        Ok(())
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> Result<(), BlobError> {
        self.lock().uploads.remove(upload_id);
        Ok(())
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>) -> Result<ListPage, BlobError> {
        let inner = self.lock();
        let mut objects: Vec<ListedObject> = inner
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| cursor.is_none_or(|cursor| key.as_str() > cursor))
            .map(|(key, data)| ListedObject {
                key: key.clone(),
                size: data.len() as u64,
            })
            .collect();
        let next = if objects.len() > LIST_PAGE_SIZE {
            objects.truncate(LIST_PAGE_SIZE);
            objects.last().map(|obj| obj.key.clone())
        } else {
            None
        };
        Ok(ListPage {
            objects,
            cursor: next,
        })
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, BlobError> {
        let mut inner = self.lock();
        let mut deleted = 0;
        for key in keys {
            if inner.objects.remove(key).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn range_reads_clamp_to_object_size() {
        let store = MemoryBlobStore::new();
        store.put("k", Bytes::from_static(b"abcdef")).await.unwrap();
        assert_eq!(&store.get_range("k", 2, 2).await.unwrap()[..], b"cd");
        assert_eq!(&store.get_range("k", 4, 100).await.unwrap()[..], b"ef");
        assert!(store.get_range("k", 10, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn multipart_round_trip() {
        let store = MemoryBlobStore::new();
        let upload = store.create_multipart("m").await.unwrap();
        store
            .upload_part("m", &upload, 1, Bytes::from_static(b"aa"))
            .await
            .unwrap();
        store
            .upload_part("m", &upload, 2, Bytes::from_static(b"bb"))
            .await
            .unwrap();
        store.complete_multipart("m", &upload, &[1, 2]).await.unwrap();
        assert_eq!(&store.object("m").unwrap()[..], b"aabb");
    }

    #[tokio::test]
    async fn list_respects_prefix_and_cursor() {
        let store = MemoryBlobStore::new();
        for key in ["p/a", "p/b", "q/c"] {
            store.put(key, Bytes::from_static(b"x")).await.unwrap();
        }
        let page = store.list("p/", None).await.unwrap();
        assert_eq!(page.objects.len(), 2);
        let resumed = store.list("p/", Some("p/a")).await.unwrap();
        assert_eq!(resumed.objects.len(), 1);
        assert_eq!(resumed.objects[0].key, "p/b");
    }
}
