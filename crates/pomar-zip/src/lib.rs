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

//! End-of-archive parsing and tail rewriting for classic (non-ZIP64) ZIP
//! archives.
//!
//! The pipeline never reads a package front to back: it range-reads the last
//! few kilobytes to locate the central directory, pulls individual entries by
//! their recorded offsets, and appends new stored entries by rewriting only
//! the bytes from the central directory onward. Everything here is pure
//! byte-slice work; callers own the I/O.

pub mod append;
pub mod error;
pub mod tail;

pub use append::{NewFile, TailRewrite, append_files, append_suffix};
pub use error::ZipError;
pub use tail::{
    CdEntry, Eocd, LOCAL_HEADER_LEN, MAX_TAIL_LEN, decompress_entry, find_eocd, local_data_start,
    parse_central_directory,
};
