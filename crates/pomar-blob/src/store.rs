//! The blob store port.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::BlobError;

/// Size and entity tag reported by a head request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Opaque entity tag; changes whenever the object changes.
    pub etag: String,
}

/// One object returned by a prefix listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    /// Full object key.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Objects on this page, in key order.
    pub objects: Vec<ListedObject>,
    /// Cursor for the next page; `None` when the listing is exhausted.
    pub cursor: Option<String>,
}

/// Capabilities the artifact pipeline requires from object storage.
///
/// Part numbers start at 1. `complete_multipart` receives the part numbers
/// in the order they should be concatenated; callers sort before invoking.
/// Reading past the end of an object yields the available suffix (possibly
/// empty), matching HTTP range semantics.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Size and etag for `key`, or `None` when absent.
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, BlobError>;

    /// Read `len` bytes starting at `offset`.
    async fn get_range(&self, key: &str, offset: u64, len: u64) -> Result<Bytes, BlobError>;

    /// Store a complete object in one call, replacing any existing value.
    async fn put(&self, key: &str, data: Bytes) -> Result<(), BlobError>;

    /// Begin a multipart upload targeting `key`; returns the upload id.
    async fn create_multipart(&self, key: &str) -> Result<String, BlobError>;

    /// Upload one numbered part.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<(), BlobError>;

    /// Assemble the uploaded parts into the final object.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> Result<(), BlobError>;

    /// Discard an in-progress multipart upload and its staged parts.
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), BlobError>;

    /// List objects under `prefix`, resuming from `cursor` when given.
    async fn list(&self, prefix: &str, cursor: Option<&str>) -> Result<ListPage, BlobError>;

    /// Delete the given keys; absent keys are ignored. Returns the number
    /// of objects actually removed.
    async fn delete_many(&self, keys: &[String]) -> Result<u64, BlobError>;
}
