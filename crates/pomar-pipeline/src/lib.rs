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

//! Download-and-compile pipeline: stream a CDN artifact into the blob store
//! through a multipart upload, then rewrite the archive tail to inject DRM
//! signatures and metadata.
//!
//! The engine is memory-bounded: at any moment it holds at most two part
//! buffers plus one in-flight upload. The injection step never reads the
//! archive front to back; it works from ranged reads and publishes through
//! a sibling temp key.

pub mod engine;
pub mod error;
pub mod facade;
pub mod inject;
pub mod progress;

pub use engine::{DownloadEngine, EngineTuning};
pub use error::PipelineError;
pub use facade::{ArtifactPipeline, CdnPipeline};
pub use inject::Injector;
pub use progress::{NullProgress, ProgressSink};
