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

//! Ranged blob store port (driven port) and its implementations.
//!
//! The pipeline needs exactly six capabilities: random-access range reads,
//! size/etag head, single-shot put, multipart upload with ordered part
//! numbers, prefix listing with a cursor, and batch delete. Implementations
//! must support concurrent reads against one key while a distinct key is
//! being written; the injection step relies on that by staging into a
//! sibling temp key.

pub mod error;
pub mod fs;
pub mod memory;
pub mod store;

pub use error::BlobError;
pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;
pub use store::{BlobStore, ListPage, ListedObject, ObjectMeta};
