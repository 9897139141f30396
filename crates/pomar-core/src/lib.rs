#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Core domain types and DTOs shared across the Pomar workspace.
//!
//! The wire format mirrors the JSON spoken by the browser client: camelCase
//! field names with the two historical oddities (`bundleID`, `iTunesMetadata`)
//! preserved via explicit renames.

pub mod model;
pub mod validate;

pub use model::{
    CleanupSettings, CreateDownloadRequest, DownloadTask, PackageInfo, SanitizedTask, Sinf,
    Software, TaskStatus,
};
pub use validate::{
    ValidationError, format_speed, sanitize_filename, sanitize_path_segment,
    validate_account_hash, validate_create_request, validate_download_url, validate_path_segment,
};
