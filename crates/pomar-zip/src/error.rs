//! Error type for archive tail parsing and rewriting.

use thiserror::Error;

/// Failure while parsing or rewriting an archive tail.
#[derive(Debug, Error)]
pub enum ZipError {
    /// No end-of-central-directory signature within the searched tail.
    #[error("no end-of-central-directory record found; not a ZIP archive")]
    NotAZip,
    /// The archive uses a feature outside the classic single-disk format.
    #[error("unsupported archive feature: {feature}")]
    Unsupported {
        /// Which feature was encountered.
        feature: &'static str,
    },
    /// An entry is compressed with a method other than stored or deflate.
    #[error("unsupported compression method {method}")]
    UnsupportedCompression {
        /// Raw method code from the central directory.
        method: u16,
    },
    /// A structure was shorter than its fixed layout requires.
    #[error("truncated {what}")]
    Truncated {
        /// Which structure was cut short.
        what: &'static str,
    },
    /// A recorded offset or size contradicts the surrounding structure.
    #[error("corrupt archive: {what}")]
    Corrupt {
        /// What contradicted the structure.
        what: &'static str,
    },
    /// Entry payload did not inflate or checksum as recorded.
    #[error("entry data mismatch: {what}")]
    DataMismatch {
        /// What failed to match.
        what: &'static str,
    },
}
