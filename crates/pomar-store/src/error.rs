//! Task store error type.

use pomar_blob::BlobError;
use pomar_core::ValidationError;
use thiserror::Error;

/// Failure surfaced by a task store RPC.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Request validation failed before any side effects.
    #[error("invalid request: {source}")]
    Invalid {
        /// Source validation error.
        #[from]
        source: ValidationError,
    },
    /// A non-failed task already exists for this (tenant, bundle, version).
    #[error("a task for this app version is already in flight")]
    Duplicate,
    /// Persistence failure.
    #[error("task store persistence failed")]
    Db {
        /// Source database error.
        #[from]
        source: sqlx::Error,
    },
    /// Blob store failure while resolving artifact state.
    #[error("blob store operation failed")]
    Blob {
        /// Source blob error.
        #[from]
        source: BlobError,
    },
    /// A stored record did not deserialize.
    #[error("stored record corrupt: {what}")]
    Corrupt {
        /// What failed to decode.
        what: String,
    },
    /// The store worker is no longer running.
    #[error("task store worker is gone")]
    WorkerGone,
}
