//! Chunked blob-to-body streaming.

use std::sync::Arc;

use axum::body::Body;
use pomar_blob::{BlobError, BlobStore};

const STREAM_CHUNK: u64 = 4 * 1024 * 1024;

/// Stream an object as a response body in fixed-size ranged reads, so a
/// multi-gigabyte artifact never materializes in memory.
pub(crate) fn blob_body(blob: Arc<dyn BlobStore>, key: String, size: u64) -> Body {
    let stream = futures_util::stream::try_unfold(0u64, move |offset| {
        let blob = Arc::clone(&blob);
        let key = key.clone();
        async move {
            if offset >= size {
                return Ok::<_, BlobError>(None);
            }
            let len = STREAM_CHUNK.min(size - offset);
            let chunk = blob.get_range(&key, offset, len).await?;
            Ok(Some((chunk, offset + len)))
        }
    });
    Body::from_stream(stream)
}
