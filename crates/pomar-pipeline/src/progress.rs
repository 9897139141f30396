//! Progress reporting port.

use async_trait::async_trait;

/// Receives throttled progress updates from a running download.
///
/// Implemented by the task store handle so the engine never owns a task
/// record directly; reports carry no ordering guarantees across tasks.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Record the current completion percentage and human-readable speed.
    async fn report(&self, progress: u8, speed: String);
}

/// Sink that discards every report; for jobs nobody watches.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

#[async_trait]
impl ProgressSink for NullProgress {
    async fn report(&self, _progress: u8, _speed: String) {}
}
