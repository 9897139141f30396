//! Pipeline error type.

use pomar_blob::BlobError;
use pomar_zip::ZipError;
use thiserror::Error;

/// Failure inside the download or injection pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The download URL failed policy validation.
    #[error("download URL rejected: {reason}")]
    InvalidUrl {
        /// Which rule was violated.
        reason: String,
    },
    /// Declared or observed artifact size exceeds the hard cap.
    #[error("artifact too large: exceeds {limit_bytes} bytes")]
    TooLarge {
        /// Configured byte limit.
        limit_bytes: u64,
    },
    /// No body chunk arrived within the stall window.
    #[error("CDN stalled mid-stream")]
    CdnStall,
    /// The CDN answered with a non-success status.
    #[error("upstream returned status {status}")]
    UpstreamStatus {
        /// HTTP status code.
        status: u16,
    },
    /// Transport-level failure talking to the CDN, after retries.
    #[error("upstream request failed")]
    UpstreamTransport {
        /// Source client error.
        source: reqwest::Error,
    },
    /// A fetch attempt exceeded the per-attempt timeout.
    #[error("upstream attempt timed out")]
    UpstreamTimeout,
    /// The job was cancelled by pause or delete; consumed silently by the
    /// caller.
    #[error("cancelled")]
    Cancelled,
    /// Blob store failure.
    #[error("blob store operation failed")]
    Blob {
        /// Source blob error.
        #[from]
        source: BlobError,
    },
    /// Archive tail parsing or rewriting failure.
    #[error("archive rewrite failed")]
    Archive {
        /// Source archive error.
        #[from]
        source: ZipError,
    },
    /// The package content was not shaped like an installable app.
    #[error("package format invalid: {what}")]
    Format {
        /// What was missing or malformed.
        what: String,
    },
    /// Unexpected internal failure, e.g. a panicked upload task.
    #[error("internal pipeline failure: {what}")]
    Internal {
        /// Description of the failure.
        what: String,
    },
}

impl PipelineError {
    /// Whether the caller should treat the failure as a silent cancel.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
