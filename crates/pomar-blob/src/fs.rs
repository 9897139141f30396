//! Filesystem-backed blob store.
//!
//! Objects live under a root directory at their key paths. Multipart
//! uploads and single-shot puts stage under a hidden `.staging` directory
//! on the same filesystem, so publishing is always a rename.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;

use crate::error::BlobError;
use crate::store::{BlobStore, ListPage, ListedObject, ObjectMeta};

const STAGING_DIR: &str = ".staging";
const LIST_PAGE_SIZE: usize = 1000;

/// Blob store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

fn validate_key(key: &str) -> Result<(), BlobError> {
    let invalid = || BlobError::InvalidKey {
        key: key.to_string(),
    };
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(invalid());
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid());
        }
    }
    if key.starts_with('.') {
        return Err(invalid());
    }
    Ok(())
}

impl FsBlobStore {
    /// Open a store rooted at `root`, creating the directory tree as
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error when the root or staging directory cannot be
    /// created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        fs::create_dir_all(root.join(STAGING_DIR))
            .await
            .map_err(|err| BlobError::io("create_root", err))?;
        Ok(Self { root })
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, BlobError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn upload_dir(&self, upload_id: &str) -> PathBuf {
        self.root.join(STAGING_DIR).join(upload_id)
    }

    async fn publish(&self, staged: &Path, key: &str) -> Result<(), BlobError> {
        let dest = self.object_path(key)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| BlobError::io("create_parents", err))?;
        }
        fs::rename(staged, &dest)
            .await
            .map_err(|err| BlobError::io("publish_rename", err))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, BlobError> {
        let path = self.object_path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => {
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map_or(0, |d| d.as_nanos());
                Ok(Some(ObjectMeta {
                    size: meta.len(),
                    etag: format!("{:x}-{mtime:x}", meta.len()),
                }))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(BlobError::io("head", err)),
        }
    }

    async fn get_range(&self, key: &str, offset: u64, len: u64) -> Result<Bytes, BlobError> {
        let path = self.object_path(key)?;
        let mut file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(BlobError::NotFound {
                    key: key.to_string(),
                });
            }
            Err(err) => return Err(BlobError::io("open", err)),
        };
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|err| BlobError::io("seek", err))?;
        let mut buf = Vec::new();
        file.take(len)
            .read_to_end(&mut buf)
            .await
            .map_err(|err| BlobError::io("read_range", err))?;
        Ok(Bytes::from(buf))
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<(), BlobError> {
        validate_key(key)?;
        let staged = self
            .root
            .join(STAGING_DIR)
            .join(format!("put-{}", Uuid::new_v4()));
        fs::write(&staged, &data)
            .await
            .map_err(|err| BlobError::io("stage_put", err))?;
        self.publish(&staged, key).await
    }

    async fn create_multipart(&self, key: &str) -> Result<String, BlobError> {
        validate_key(key)?;
        let upload_id = Uuid::new_v4().to_string();
        fs::create_dir_all(self.upload_dir(&upload_id))
            .await
            .map_err(|err| BlobError::io("create_multipart", err))?;
        debug!(key, upload_id, "multipart upload started");
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<(), BlobError> {
        validate_key(key)?;
        let dir = self.upload_dir(upload_id);
        if fs::metadata(&dir).await.is_err() {
            return Err(BlobError::UnknownUpload {
                upload_id: upload_id.to_string(),
            });
        }
        fs::write(dir.join(format!("part-{part_number}")), &data)
            .await
            .map_err(|err| BlobError::io("upload_part", err))
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> Result<(), BlobError> {
        let dir = self.upload_dir(upload_id);
        if fs::metadata(&dir).await.is_err() {
            return Err(BlobError::UnknownUpload {
                upload_id: upload_id.to_string(),
            });
        }

        let assembled = dir.join("assembled");
        let mut out = fs::File::create(&assembled)
            .await
            .map_err(|err| BlobError::io("assemble_create", err))?;
        for &part_number in part_numbers {
            let part_path = dir.join(format!("part-{part_number}"));
            let mut part = match fs::File::open(&part_path).await {
                Ok(file) => file,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    return Err(BlobError::MissingPart {
                        upload_id: upload_id.to_string(),
                        part_number,
                    });
                }
                Err(err) => return Err(BlobError::io("assemble_open_part", err)),
            };
            tokio::io::copy(&mut part, &mut out)
                .await
                .map_err(|err| BlobError::io("assemble_copy", err))?;
        }
        out.flush()
            .await
            .map_err(|err| BlobError::io("assemble_flush", err))?;
        drop(out);

        self.publish(&assembled, key).await?;
        fs::remove_dir_all(&dir)
            .await
            .map_err(|err| BlobError::io("assemble_cleanup", err))?;
        debug!(key, upload_id, parts = part_numbers.len(), "multipart upload completed");
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), BlobError> {
        let dir = self.upload_dir(upload_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(key, upload_id, "multipart upload aborted");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BlobError::io("abort_multipart", err)),
        }
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>) -> Result<ListPage, BlobError> {
        let mut keys = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(BlobError::io("list_read_dir", err)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|err| BlobError::io("list_next_entry", err))?
            {
                let path = entry.path();
                let name = entry.file_name();
                // Hidden top-level directories hold staging state, not
                // objects.
                if dir == self.root && name.to_string_lossy().starts_with('.') {
                    continue;
                }
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|err| BlobError::io("list_file_type", err))?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if let Ok(relative) = path.strip_prefix(&self.root) {
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    if key.starts_with(prefix) {
                        let size = entry
                            .metadata()
                            .await
                            .map_err(|err| BlobError::io("list_metadata", err))?
                            .len();
                        keys.push(ListedObject { key, size });
                    }
                }
            }
        }

        keys.sort_by(|a, b| a.key.cmp(&b.key));
        if let Some(cursor) = cursor {
            keys.retain(|obj| obj.key.as_str() > cursor);
        }
        let next = if keys.len() > LIST_PAGE_SIZE {
            keys.truncate(LIST_PAGE_SIZE);
            keys.last().map(|obj| obj.key.clone())
        } else {
            None
        };
        Ok(ListPage {
            objects: keys,
            cursor: next,
        })
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, BlobError> {
        let mut deleted = 0;
        for key in keys {
            let path = self.object_path(key)?;
            match fs::remove_file(&path).await {
                Ok(()) => deleted += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(BlobError::io("delete", err)),
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    async fn store() -> Result<(tempfile::TempDir, FsBlobStore)> {
        let dir = tempfile::tempdir()?;
        let store = FsBlobStore::open(dir.path()).await?;
        Ok((dir, store))
    }

    #[tokio::test]
    async fn put_head_and_range_read() -> Result<()> {
        let (_dir, store) = store().await?;
        store
            .put("packages/a/b/c.ipa", Bytes::from_static(b"hello world"))
            .await?;

        let meta = store.head("packages/a/b/c.ipa").await?.unwrap();
        assert_eq!(meta.size, 11);

        let range = store.get_range("packages/a/b/c.ipa", 6, 5).await?;
        assert_eq!(&range[..], b"world");

        // Past-the-end reads clamp like HTTP ranges.
        let clamped = store.get_range("packages/a/b/c.ipa", 6, 100).await?;
        assert_eq!(&clamped[..], b"world");
        Ok(())
    }

    #[tokio::test]
    async fn head_missing_returns_none() -> Result<()> {
        let (_dir, store) = store().await?;
        assert!(store.head("nope/missing.ipa").await?.is_none());
        assert!(matches!(
            store.get_range("nope/missing.ipa", 0, 1).await,
            Err(BlobError::NotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn multipart_assembles_parts_in_given_order() -> Result<()> {
        let (_dir, store) = store().await?;
        let upload = store.create_multipart("packages/x/y/z.ipa").await?;
        store
            .upload_part("packages/x/y/z.ipa", &upload, 2, Bytes::from_static(b"-two"))
            .await?;
        store
            .upload_part("packages/x/y/z.ipa", &upload, 1, Bytes::from_static(b"one"))
            .await?;
        store
            .complete_multipart("packages/x/y/z.ipa", &upload, &[1, 2])
            .await?;

        let body = store.get_range("packages/x/y/z.ipa", 0, 64).await?;
        assert_eq!(&body[..], b"one-two");
        Ok(())
    }

    #[tokio::test]
    async fn complete_with_missing_part_fails() -> Result<()> {
        let (_dir, store) = store().await?;
        let upload = store.create_multipart("k/v.bin").await?;
        store
            .upload_part("k/v.bin", &upload, 1, Bytes::from_static(b"a"))
            .await?;
        let err = store
            .complete_multipart("k/v.bin", &upload, &[1, 2])
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::MissingPart { part_number: 2, .. }));
        Ok(())
    }

    #[tokio::test]
    async fn abort_discards_staged_parts() -> Result<()> {
        let (_dir, store) = store().await?;
        let upload = store.create_multipart("k/v.bin").await?;
        store
            .upload_part("k/v.bin", &upload, 1, Bytes::from_static(b"a"))
            .await?;
        store.abort_multipart("k/v.bin", &upload).await?;
        assert!(matches!(
            store
                .upload_part("k/v.bin", &upload, 2, Bytes::from_static(b"b"))
                .await,
            Err(BlobError::UnknownUpload { .. })
        ));
        // Aborting twice is fine.
        store.abort_multipart("k/v.bin", &upload).await?;
        Ok(())
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_skips_staging() -> Result<()> {
        let (_dir, store) = store().await?;
        store.put("packages/t1/a/one.ipa", Bytes::from_static(b"1")).await?;
        store.put("packages/t2/b/two.ipa", Bytes::from_static(b"22")).await?;
        store.put("other/file.bin", Bytes::from_static(b"333")).await?;
        let _upload = store.create_multipart("packages/t1/a/tmp.ipa").await?;

        let page = store.list("packages/", None).await?;
        assert_eq!(page.objects.len(), 2);
        assert!(page.cursor.is_none());
        assert_eq!(page.objects[0].key, "packages/t1/a/one.ipa");
        assert_eq!(page.objects[1].size, 2);

        let everything = store.list("", None).await?;
        assert_eq!(everything.objects.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn delete_many_ignores_missing_keys() -> Result<()> {
        let (_dir, store) = store().await?;
        store.put("a/1.bin", Bytes::from_static(b"x")).await?;
        store.put("a/2.bin", Bytes::from_static(b"y")).await?;
        let deleted = store
            .delete_many(&[
                "a/1.bin".to_string(),
                "a/2.bin".to_string(),
                "a/3.bin".to_string(),
            ])
            .await?;
        assert_eq!(deleted, 2);
        Ok(())
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() -> Result<()> {
        let (_dir, store) = store().await?;
        for key in ["../escape", "/abs", "a//b", ".hidden", "a/../b"] {
            assert!(
                matches!(
                    store.put(key, Bytes::from_static(b"x")).await,
                    Err(BlobError::InvalidKey { .. })
                ),
                "key {key} should be rejected"
            );
        }
        Ok(())
    }
}
