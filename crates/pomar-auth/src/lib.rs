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

//! Authentication primitives: PBKDF2 password hashes, HMAC-signed session
//! tokens, and the browser proof-of-work gate.
//!
//! Nothing here touches storage; the task store persists the password hash
//! and the API layer owns cookies. Clocks are passed in as unix seconds so
//! every expiry path is testable.

pub mod password;
pub mod pow;
pub mod token;

pub use password::{constant_time_eq, hash_password, verify_password};
pub use pow::{DEFAULT_POW_DIFFICULTY, PowError, PowGate, clamp_difficulty};
pub use token::{SESSION_TTL_SECS, issue_session_token, validate_session_token};
