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

//! Single-writer task store and storage janitor.
//!
//! All mutations run on one owning worker task that drains a command
//! channel, so no two mutating RPCs ever interleave; read RPCs go through
//! the same channel and observe a consistent snapshot. Download jobs are
//! spawned by the worker and report back through internal commands; the
//! cancellation token per task id is the only coupling between a job and
//! the rest of the system.

mod command;
mod db;
pub mod error;
pub mod handle;
pub mod janitor;
pub mod keys;
mod worker;

pub use error::StoreError;
pub use handle::{StoreSettings, StorageTotals, TaskStore};
pub use janitor::CleanupReport;
pub use keys::artifact_key_for;
