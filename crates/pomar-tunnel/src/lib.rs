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

//! Multiplexed TCP tunnel over a single WebSocket, speaking the Wisp
//! framing.
//!
//! The tunnel relays opaque TLS bytes between a browser client and a narrow
//! allowlist of Apple hosts. It never terminates TLS and never inspects
//! payloads: CONNECT admission (stream type, port, hostname) is the entire
//! policy surface. One [`session::TunnelSession`] exists per accepted
//! WebSocket; no state survives the session.

pub mod policy;
pub mod session;
pub mod wisp;

pub use policy::{AdmissionError, INITIAL_STREAM_CREDIT, admit_connect};
pub use session::{Connector, TcpConnector, TunnelSession};
pub use wisp::{
    CLOSE_INVALID, CLOSE_NETWORK_ERROR, CLOSE_VOLUNTARY, ConnectPayload, Frame, STREAM_TYPE_TCP,
    make_close, make_continue, make_data, parse_connect, parse_frame,
};
