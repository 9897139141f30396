//! Pipeline facade consumed by the task store.
//!
//! The store drives jobs through this trait so its scheduling logic can be
//! exercised against a stub; production wires [`CdnPipeline`], which is the
//! download engine plus the injector over one blob store.

use std::sync::Arc;

use async_trait::async_trait;
use pomar_blob::BlobStore;
use pomar_core::Sinf;
use tokio_util::sync::CancellationToken;

use crate::engine::{DownloadEngine, EngineTuning};
use crate::error::PipelineError;
use crate::inject::Injector;
use crate::progress::ProgressSink;

/// The two pipeline stages a download job runs through.
#[async_trait]
pub trait ArtifactPipeline: Send + Sync {
    /// Stream `url` into `artifact_key`.
    async fn download(
        &self,
        url: &str,
        artifact_key: &str,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<(), PipelineError>;

    /// Rewrite the artifact at `artifact_key` with SINFs and metadata.
    async fn inject(
        &self,
        artifact_key: &str,
        sinfs: &[Sinf],
        itunes_metadata: Option<&str>,
    ) -> Result<(), PipelineError>;
}

/// Production pipeline: CDN download engine plus archive injector.
pub struct CdnPipeline {
    engine: DownloadEngine,
    injector: Injector,
}

impl CdnPipeline {
    /// Build the production pipeline over `blob`.
    #[must_use]
    pub fn new(blob: Arc<dyn BlobStore>) -> Self {
        Self {
            engine: DownloadEngine::new(Arc::clone(&blob)),
            injector: Injector::new(blob),
        }
    }

    /// Build a pipeline with explicit engine tuning.
    #[must_use]
    pub fn with_tuning(blob: Arc<dyn BlobStore>, tuning: EngineTuning) -> Self {
        Self {
            engine: DownloadEngine::with_tuning(Arc::clone(&blob), tuning),
            injector: Injector::new(blob),
        }
    }
}

#[async_trait]
impl ArtifactPipeline for CdnPipeline {
    async fn download(
        &self,
        url: &str,
        artifact_key: &str,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<(), PipelineError> {
        self.engine.run(url, artifact_key, cancel, progress).await
    }

    async fn inject(
        &self,
        artifact_key: &str,
        sinfs: &[Sinf],
        itunes_metadata: Option<&str>,
    ) -> Result<(), PipelineError> {
        self.injector.run(artifact_key, sinfs, itunes_metadata).await
    }
}
