//! Application-level errors for bootstrap and orchestration.

use std::io;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration values were invalid.
    #[error("invalid configuration")]
    InvalidConfig {
        /// Field name that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Optional value associated with the failure.
        value: Option<String>,
    },
    /// Blob store initialization failed.
    #[error("blob store initialization failed")]
    Blob {
        /// Operation identifier.
        operation: &'static str,
        /// Source blob error.
        source: pomar_blob::BlobError,
    },
    /// Database initialization failed.
    #[error("database initialization failed")]
    Db {
        /// Operation identifier.
        operation: &'static str,
        /// Source database error.
        source: sqlx::Error,
    },
    /// Task store operations failed.
    #[error("task store operation failed")]
    Store {
        /// Operation identifier.
        operation: &'static str,
        /// Source store error.
        source: pomar_store::StoreError,
    },
    /// API server operations failed.
    #[error("api server operation failed")]
    ApiServer {
        /// Operation identifier.
        operation: &'static str,
        /// Source API server error.
        source: pomar_api::ApiServerError,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Source IO error.
        source: io::Error,
    },
}

impl AppError {
    pub(crate) const fn blob(operation: &'static str, source: pomar_blob::BlobError) -> Self {
        Self::Blob { operation, source }
    }

    pub(crate) const fn db(operation: &'static str, source: sqlx::Error) -> Self {
        Self::Db { operation, source }
    }

    pub(crate) const fn store(operation: &'static str, source: pomar_store::StoreError) -> Self {
        Self::Store { operation, source }
    }

    pub(crate) const fn api_server(
        operation: &'static str,
        source: pomar_api::ApiServerError,
    ) -> Self {
        Self::ApiServer { operation, source }
    }
}
