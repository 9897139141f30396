//! Error type for blob store operations.

use std::io;

use thiserror::Error;

/// Failure while talking to the blob store.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The requested key does not exist.
    #[error("blob not found: {key}")]
    NotFound {
        /// Key that was requested.
        key: String,
    },
    /// A key contained path traversal or other disallowed characters.
    #[error("invalid blob key: {key}")]
    InvalidKey {
        /// Offending key.
        key: String,
    },
    /// The referenced multipart upload does not exist or was aborted.
    #[error("unknown multipart upload {upload_id}")]
    UnknownUpload {
        /// Upload identifier presented by the caller.
        upload_id: String,
    },
    /// A part number was missing when completing a multipart upload.
    #[error("multipart upload {upload_id} is missing part {part_number}")]
    MissingPart {
        /// Upload identifier.
        upload_id: String,
        /// Part number expected but never uploaded.
        part_number: u32,
    },
    /// Underlying I/O failure.
    #[error("blob store io failure during {operation}")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Source I/O error.
        source: io::Error,
    },
}

impl BlobError {
    pub(crate) const fn io(operation: &'static str, source: io::Error) -> Self {
        Self::Io { operation, source }
    }
}
