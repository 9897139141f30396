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

//! HTTP and WebSocket surface for the Pomar backend.
//!
//! Everything lives under `/api` except the Wisp tunnel upgrade at
//! `/wisp`. The session cookie gates the tunnel and the download, package,
//! and settings routes; the challenge, setup, install, bag, and search
//! routes stay open by design.

mod auth;
mod downloads;
mod error;
mod install;
mod packages;
mod proxy;
mod router;
mod settings;
pub mod state;
mod stream;
mod tunnel;

pub use router::{ApiServer, ApiServerError};
pub use state::{ApiState, BuildInfo};
