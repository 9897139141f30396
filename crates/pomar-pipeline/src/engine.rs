//! Streaming CDN download engine.
//!
//! The body is consumed chunk by chunk into a part buffer and shipped as a
//! multipart upload: when two full parts are buffered the oldest is
//! uploaded inline (backpressure), when one is buffered it is fired into a
//! single in-flight slot while reading continues. At most one upload is
//! ever outstanding, so memory stays bounded at roughly two part sizes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use pomar_blob::{BlobError, BlobStore};
use pomar_core::{format_speed, validate_download_url};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::progress::ProgressSink;

/// Knobs for the download engine. Production uses [`EngineTuning::default`];
/// tests shrink sizes and timeouts.
#[derive(Debug, Clone)]
pub struct EngineTuning {
    /// Multipart part size; every part except the last has exactly this
    /// size.
    pub part_size: usize,
    /// Hard cap on artifact bytes, declared or observed.
    pub max_artifact_bytes: u64,
    /// Bound on each individual fetch attempt.
    pub attempt_timeout: Duration,
    /// Maximum gap between body chunks before the stream counts as
    /// stalled.
    pub stall_timeout: Duration,
    /// Minimum interval between progress reports.
    pub progress_interval: Duration,
    /// Number of retries after the initial attempt.
    pub retries: u32,
    /// First backoff delay; doubles per retry.
    pub backoff_base: Duration,
    /// Enforce the HTTPS `*.apple.com` URL policy. Disabled only by tests
    /// exercising the streaming machinery against local servers.
    pub enforce_cdn_policy: bool,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            part_size: 25 * 1024 * 1024,
            max_artifact_bytes: 8 * 1024 * 1024 * 1024,
            attempt_timeout: Duration::from_secs(30),
            stall_timeout: Duration::from_secs(60),
            progress_interval: Duration::from_secs(2),
            retries: 3,
            backoff_base: Duration::from_secs(1),
            enforce_cdn_policy: true,
        }
    }
}

/// Streams one CDN URL into one artifact key.
pub struct DownloadEngine {
    client: reqwest::Client,
    blob: Arc<dyn BlobStore>,
    tuning: EngineTuning,
}

impl DownloadEngine {
    /// Create an engine with production tuning.
    #[must_use]
    pub fn new(blob: Arc<dyn BlobStore>) -> Self {
        Self::with_tuning(blob, EngineTuning::default())
    }

    /// Create an engine with explicit tuning.
    #[must_use]
    pub fn with_tuning(blob: Arc<dyn BlobStore>, tuning: EngineTuning) -> Self {
        Self {
            client: reqwest::Client::new(),
            blob,
            tuning,
        }
    }

    /// Download `url` into `artifact_key`.
    ///
    /// Progress reports are throttled to the configured interval. On any
    /// failure the multipart upload is aborted before the error
    /// propagates; cancellation surfaces as [`PipelineError::Cancelled`].
    ///
    /// # Errors
    ///
    /// See [`PipelineError`] for the failure classes.
    pub async fn run(
        &self,
        url: &str,
        artifact_key: &str,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<(), PipelineError> {
        if self.tuning.enforce_cdn_policy {
            validate_download_url(url).map_err(|err| PipelineError::InvalidUrl {
                reason: err.to_string(),
            })?;
        }

        let response = self.fetch_with_retry(url, cancel).await?;
        if let Some(declared) = response.content_length()
            && declared > self.tuning.max_artifact_bytes
        {
            return Err(PipelineError::TooLarge {
                limit_bytes: self.tuning.max_artifact_bytes,
            });
        }

        self.stream_to_blob(response, artifact_key, cancel, progress)
            .await
    }

    async fn fetch_with_retry(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, PipelineError> {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let failure = match timeout(self.tuning.attempt_timeout, self.client.get(url).send())
                .await
            {
                Ok(Ok(response)) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let status = status.as_u16();
                    if status < 500 {
                        // Client errors will not heal; fail immediately.
                        return Err(PipelineError::UpstreamStatus { status });
                    }
                    PipelineError::UpstreamStatus { status }
                }
                Ok(Err(source)) => PipelineError::UpstreamTransport { source },
                Err(_) => PipelineError::UpstreamTimeout,
            };

            if attempt >= self.tuning.retries {
                return Err(failure);
            }
            attempt += 1;
            let backoff = self.tuning.backoff_base * 2u32.pow(attempt - 1);
            warn!(url, attempt, backoff_ms = backoff.as_millis() as u64, error = %failure, "retrying CDN fetch");
            tokio::select! {
                () = cancel.cancelled() => return Err(PipelineError::Cancelled),
                () = sleep(backoff) => {}
            }
        }
    }

    async fn stream_to_blob(
        &self,
        response: reqwest::Response,
        key: &str,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<(), PipelineError> {
        let upload_id = self.blob.create_multipart(key).await?;
        let mut pending = PendingSlot::default();

        let pumped = self
            .pump_body(response, key, &upload_id, cancel, progress, &mut pending)
            .await;

        match pumped {
            Ok(mut parts) => {
                parts.sort_unstable();
                self.blob.complete_multipart(key, &upload_id, &parts).await?;
                info!(key, parts = parts.len(), "download streamed to blob store");
                Ok(())
            }
            Err(err) => {
                pending.abort();
                if let Err(abort_err) = self.blob.abort_multipart(key, &upload_id).await {
                    warn!(key, error = %abort_err, "failed to abort multipart upload");
                }
                Err(err)
            }
        }
    }

    async fn pump_body(
        &self,
        response: reqwest::Response,
        key: &str,
        upload_id: &str,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
        pending: &mut PendingSlot,
    ) -> Result<Vec<u32>, PipelineError> {
        let total = response.content_length();
        let part_size = self.tuning.part_size;
        let mut stream = response.bytes_stream();
        let mut buffer = PartBuffer::default();
        let mut parts: Vec<u32> = Vec::new();
        let mut next_part: u32 = 1;
        let mut downloaded: u64 = 0;
        let mut last_report = Instant::now();
        let mut bytes_since_report: u64 = 0;

        loop {
            let chunk = tokio::select! {
                () = cancel.cancelled() => return Err(PipelineError::Cancelled),
                next = timeout(self.tuning.stall_timeout, stream.next()) => match next {
                    Err(_) => return Err(PipelineError::CdnStall),
                    Ok(None) => break,
                    Ok(Some(Err(source))) => return Err(PipelineError::UpstreamTransport { source }),
                    Ok(Some(Ok(chunk))) => chunk,
                },
            };

            downloaded += chunk.len() as u64;
            if downloaded > self.tuning.max_artifact_bytes {
                return Err(PipelineError::TooLarge {
                    limit_bytes: self.tuning.max_artifact_bytes,
                });
            }
            bytes_since_report += chunk.len() as u64;
            buffer.push(chunk);

            // Two full parts buffered: the reader is ahead of the network;
            // drain the slot and upload inline for backpressure.
            while buffer.len() >= 2 * part_size {
                if let Some(number) = pending.drain().await? {
                    parts.push(number);
                }
                let data = buffer.take(part_size);
                self.blob
                    .upload_part(key, upload_id, next_part, data)
                    .await?;
                parts.push(next_part);
                next_part += 1;
            }

            // One full part and a free slot: upload while we keep reading.
            if pending.is_empty() && buffer.len() >= part_size {
                let data = buffer.take(part_size);
                let blob = Arc::clone(&self.blob);
                let key = key.to_string();
                let upload = upload_id.to_string();
                let number = next_part;
                next_part += 1;
                pending.fire(
                    number,
                    tokio::spawn(async move { blob.upload_part(&key, &upload, number, data).await }),
                );
            }

            if last_report.elapsed() >= self.tuning.progress_interval {
                let elapsed = last_report.elapsed().as_secs_f64();
                #[expect(
                    clippy::cast_precision_loss,
                    reason = "transfer rates lose nothing meaningful at f64"
                )]
                let speed = format_speed(bytes_since_report as f64 / elapsed.max(0.001));
                progress.report(percent(downloaded, total), speed).await;
                last_report = Instant::now();
                bytes_since_report = 0;
            }
        }

        // Stream finished: drain the slot, flush remaining full parts,
        // then the trailing partial.
        if let Some(number) = pending.drain().await? {
            parts.push(number);
        }
        while buffer.len() >= part_size {
            let data = buffer.take(part_size);
            self.blob
                .upload_part(key, upload_id, next_part, data)
                .await?;
            parts.push(next_part);
            next_part += 1;
        }
        if buffer.len() > 0 {
            let data = buffer.take_rest();
            self.blob
                .upload_part(key, upload_id, next_part, data)
                .await?;
            parts.push(next_part);
        }

        debug!(key, bytes = downloaded, "body fully consumed");
        Ok(parts)
    }
}

fn percent(downloaded: u64, total: Option<u64>) -> u8 {
    total
        .filter(|&t| t > 0)
        .map_or(0, |t| u8::try_from((downloaded * 100 / t).min(100)).unwrap_or(100))
}

/// The single in-flight part upload.
#[derive(Default)]
struct PendingSlot {
    inner: Option<(u32, JoinHandle<Result<(), BlobError>>)>,
}

impl PendingSlot {
    const fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    fn fire(&mut self, number: u32, handle: JoinHandle<Result<(), BlobError>>) {
        debug_assert!(self.inner.is_none(), "only one upload may be in flight");
        self.inner = Some((number, handle));
    }

    async fn drain(&mut self) -> Result<Option<u32>, PipelineError> {
        let Some((number, handle)) = self.inner.take() else {
            return Ok(None);
        };
        let result = handle.await.map_err(|err| PipelineError::Internal {
            what: format!("part upload task failed: {err}"),
        })?;
        result?;
        Ok(Some(number))
    }

    fn abort(&mut self) {
        if let Some((_, handle)) = self.inner.take() {
            handle.abort();
        }
    }
}

/// Chunk accumulator that can cut exact part-sized slices.
#[derive(Default)]
struct PartBuffer {
    chunks: VecDeque<Bytes>,
    buffered: usize,
}

impl PartBuffer {
    fn push(&mut self, chunk: Bytes) {
        self.buffered += chunk.len();
        self.chunks.push_back(chunk);
    }

    const fn len(&self) -> usize {
        self.buffered
    }

    fn take(&mut self, size: usize) -> Bytes {
        debug_assert!(self.buffered >= size);
        let mut out = BytesMut::with_capacity(size);
        let mut needed = size;
        while needed > 0 {
            let mut chunk = self.chunks.pop_front().expect("buffered bytes available");
            if chunk.len() > needed {
                let head = chunk.split_to(needed);
                out.extend_from_slice(&head);
                self.chunks.push_front(chunk);
                needed = 0;
            } else {
                needed -= chunk.len();
                out.extend_from_slice(&chunk);
            }
        }
        self.buffered -= size;
        out.freeze()
    }

    fn take_rest(&mut self) -> Bytes {
        let rest = self.buffered;
        self.take(rest)
    }
}
