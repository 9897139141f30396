//! Shared application state threaded through every handler.

use std::sync::Arc;

use pomar_auth::PowGate;
use pomar_blob::BlobStore;
use pomar_store::TaskStore;

/// Build metadata reported by the settings endpoint.
#[derive(Debug, Clone, Default)]
pub struct BuildInfo {
    /// Commit hash baked in at build time.
    pub commit: String,
    /// Build date baked in at build time.
    pub date: String,
}

/// Dependencies shared by the HTTP handlers.
pub struct ApiState {
    /// Task store handle.
    pub store: TaskStore,
    /// Blob store for streaming artifact bodies.
    pub blob: Arc<dyn BlobStore>,
    /// Proof-of-work gate with its process-ephemeral key.
    pub pow: PowGate,
    /// Public CDN domain for artifact redirects, already validated against
    /// `^[\w.-]+$`.
    pub cdn_domain: Option<String>,
    /// Build metadata.
    pub build: BuildInfo,
    /// Shared HTTP client for the bag and search proxies.
    pub http: reqwest::Client,
}

impl ApiState {
    /// Assemble the state from its parts.
    #[must_use]
    pub fn new(
        store: TaskStore,
        blob: Arc<dyn BlobStore>,
        pow: PowGate,
        cdn_domain: Option<String>,
        build: BuildInfo,
    ) -> Self {
        Self {
            store,
            blob,
            pow,
            cdn_domain,
            build,
            http: reqwest::Client::new(),
        }
    }
}
