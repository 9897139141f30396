//! The owning worker task behind the store handle.
//!
//! One worker per deployment: it drains the command channel, so every
//! mutation is serialized. Download jobs are spawned from here and talk
//! back through internal `Job*` commands; their cancellation tokens are
//! the only shared state.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use pomar_blob::BlobStore;
use pomar_core::{
    CleanupSettings, CreateDownloadRequest, DownloadTask, PackageInfo, SanitizedTask, Sinf,
    TaskStatus, validate_create_request,
};
use pomar_pipeline::{ArtifactPipeline, ProgressSink};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::command::{JobOutcome, StoreCommand};
use crate::db::{Db, SETTING_CLEANUP_DAYS, SETTING_CLEANUP_MAX_MB, SETTING_PASSWORD_HASH};
use crate::error::StoreError;
use crate::handle::StorageTotals;
use crate::janitor;
use crate::keys::{artifact_key_for, temp_key_for};

pub(crate) struct Worker {
    db: Db,
    blob: Arc<dyn BlobStore>,
    pipeline: Arc<dyn ArtifactPipeline>,
    cleanup_defaults: CleanupSettings,
    jobs: HashMap<Uuid, CancellationToken>,
    self_tx: mpsc::Sender<StoreCommand>,
}

pub(crate) fn spawn(
    db: Db,
    blob: Arc<dyn BlobStore>,
    pipeline: Arc<dyn ArtifactPipeline>,
    cleanup_defaults: CleanupSettings,
    self_tx: mpsc::Sender<StoreCommand>,
    mut commands: mpsc::Receiver<StoreCommand>,
) {
    tokio::spawn(async move {
        let mut worker = Worker {
            db,
            blob,
            pipeline,
            cleanup_defaults,
            jobs: HashMap::new(),
            self_tx,
        };
        worker.recover_interrupted().await;
        while let Some(command) = commands.recv().await {
            worker.handle(command).await;
        }
        debug!("store worker shutting down");
    });
}

impl Worker {
    /// Jobs do not survive a restart; anything left mid-flight is parked
    /// as paused so the tenant can resume it.
    async fn recover_interrupted(&self) {
        let tasks = match self.db.all_tasks().await {
            Ok(tasks) => tasks,
            Err(err) => {
                error!(error = %err, "failed to scan tasks during recovery");
                return;
            }
        };
        for mut task in tasks {
            if matches!(
                task.status,
                TaskStatus::Pending | TaskStatus::Downloading | TaskStatus::Injecting
            ) {
                task.status = TaskStatus::Paused;
                task.speed = "0 B/s".to_string();
                if let Err(err) = self.db.update_task(&task).await {
                    error!(task_id = %task.id, error = %err, "failed to park interrupted task");
                } else {
                    info!(task_id = %task.id, "parked interrupted task as paused");
                }
            }
        }
    }

    #[expect(clippy::too_many_lines, reason = "one arm per RPC keeps the dispatch flat")]
    async fn handle(&mut self, command: StoreCommand) {
        match command {
            StoreCommand::CreateTask { request, reply } => {
                let _ = reply.send(self.create_task(*request).await);
            }
            StoreCommand::GetTask {
                id,
                account_hash,
                reply,
            } => {
                let _ = reply.send(self.get_task(id, Some(&account_hash)).await);
            }
            StoreCommand::ListTasks {
                account_hashes,
                reply,
            } => {
                let _ = reply.send(self.list_tasks(&account_hashes).await);
            }
            StoreCommand::ListPackages {
                account_hashes,
                reply,
            } => {
                let _ = reply.send(self.list_packages(&account_hashes).await);
            }
            StoreCommand::PauseTask {
                id,
                account_hash,
                reply,
            } => {
                let _ = reply.send(self.pause_task(id, &account_hash).await);
            }
            StoreCommand::ResumeTask {
                id,
                account_hash,
                reply,
            } => {
                let _ = reply.send(self.resume_task(id, &account_hash).await);
            }
            StoreCommand::DeleteTask {
                id,
                account_hash,
                reply,
            } => {
                let _ = reply.send(self.delete_task(id, &account_hash).await);
            }
            StoreCommand::GetTaskPublic { id, reply } => {
                let _ = reply.send(self.get_task(id, None).await);
            }
            StoreCommand::GetArtifactKeyPublic { id, reply } => {
                let _ = reply.send(self.artifact_key_public(id).await);
            }
            StoreCommand::GetConfig { reply } => {
                let _ = reply.send(self.get_config().await);
            }
            StoreCommand::SetConfig { settings, reply } => {
                let _ = reply.send(self.set_config(settings).await);
            }
            StoreCommand::GetPasswordHash { reply } => {
                let _ = reply.send(self.db.get_setting(SETTING_PASSWORD_HASH).await);
            }
            StoreCommand::SetPasswordHash { hash, reply } => {
                let _ = reply.send(self.db.put_setting(SETTING_PASSWORD_HASH, &hash).await);
            }
            StoreCommand::SetPasswordHashIfAbsent { hash, reply } => {
                let _ = reply.send(
                    self.db
                        .put_setting_if_absent(SETTING_PASSWORD_HASH, &hash)
                        .await,
                );
            }
            StoreCommand::RunCleanup { reply } => {
                let result = match self.get_config().await {
                    Ok(settings) => {
                        janitor::run(&self.db, self.blob.as_ref(), &mut self.jobs, settings).await
                    }
                    Err(err) => Err(err),
                };
                let _ = reply.send(result);
            }
            StoreCommand::StorageTotals { reply } => {
                let _ = reply.send(self.storage_totals().await);
            }
            StoreCommand::JobDownloading { id } => self.job_downloading(id).await,
            StoreCommand::JobProgress {
                id,
                progress,
                speed,
            } => self.job_progress(id, progress, speed).await,
            StoreCommand::JobInjecting { id } => self.job_injecting(id).await,
            StoreCommand::JobFinished { id, outcome } => self.job_finished(id, outcome).await,
        }
    }

    async fn create_task(
        &mut self,
        request: CreateDownloadRequest,
    ) -> Result<SanitizedTask, StoreError> {
        validate_create_request(&request)?;
        if self
            .db
            .has_active_duplicate(
                &request.account_hash,
                &request.software.bundle_id,
                &request.software.version,
            )
            .await?
        {
            return Err(StoreError::Duplicate);
        }

        let task = DownloadTask::new(request);
        self.db.insert_task(&task).await?;
        info!(
            task_id = %task.id,
            bundle_id = %task.software.bundle_id,
            version = %task.software.version,
            "download task created"
        );
        self.spawn_job(&task);
        Ok(task.sanitize(None))
    }

    fn spawn_job(&mut self, task: &DownloadTask) {
        let token = CancellationToken::new();
        self.jobs.insert(task.id, token.clone());
        let job = JobSpec {
            id: task.id,
            artifact_key: artifact_key_for(
                &task.account_hash,
                &task.software.bundle_id,
                task.id,
            ),
            download_url: task.download_url.clone(),
            sinfs: task.sinfs.clone(),
            itunes_metadata: task.itunes_metadata.clone(),
            wants_injection: task.wants_injection(),
        };
        tokio::spawn(run_job(
            Arc::clone(&self.pipeline),
            self.self_tx.clone(),
            job,
            token,
        ));
    }

    /// Load, tenant-check, and sanitize one task. A tenant mismatch is
    /// indistinguishable from a missing record.
    async fn get_task(
        &self,
        id: Uuid,
        account_hash: Option<&str>,
    ) -> Result<Option<SanitizedTask>, StoreError> {
        let Some(task) = self.db.load_task(id).await? else {
            return Ok(None);
        };
        if account_hash.is_some_and(|hash| task.account_hash != hash) {
            return Ok(None);
        }
        Ok(Some(self.sanitized(&task).await?))
    }

    async fn sanitized(&self, task: &DownloadTask) -> Result<SanitizedTask, StoreError> {
        let file_size = if task.status == TaskStatus::Completed {
            match self.db.artifact_key(task.id).await? {
                Some(key) => self.blob.head(&key).await?.map(|meta| meta.size),
                None => None,
            }
        } else {
            None
        };
        Ok(task.sanitize(file_size))
    }

    async fn list_tasks(
        &self,
        account_hashes: &[String],
    ) -> Result<Vec<SanitizedTask>, StoreError> {
        let mut out = Vec::new();
        for hash in account_hashes {
            for task in self.db.tasks_for_account(hash).await? {
                out.push(self.sanitized(&task).await?);
            }
        }
        Ok(out)
    }

    async fn list_packages(
        &self,
        account_hashes: &[String],
    ) -> Result<Vec<PackageInfo>, StoreError> {
        let mut out = Vec::new();
        for hash in account_hashes {
            for task in self.db.tasks_for_account(hash).await? {
                if task.status != TaskStatus::Completed {
                    continue;
                }
                let file_size = match self.db.artifact_key(task.id).await? {
                    Some(key) => self.blob.head(&key).await?.map_or(0, |meta| meta.size),
                    None => 0,
                };
                out.push(PackageInfo {
                    id: task.id,
                    software: task.software.clone(),
                    account_hash: task.account_hash.clone(),
                    file_size,
                    created_at: task.created_at,
                });
            }
        }
        Ok(out)
    }

    async fn pause_task(
        &mut self,
        id: Uuid,
        account_hash: &str,
    ) -> Result<Option<SanitizedTask>, StoreError> {
        let Some(mut task) = self.db.load_task(id).await? else {
            return Ok(None);
        };
        if task.account_hash != account_hash || task.status != TaskStatus::Downloading {
            return Ok(None);
        }
        if let Some(token) = self.jobs.remove(&id) {
            token.cancel();
        }
        task.status = TaskStatus::Paused;
        task.speed = "0 B/s".to_string();
        self.db.update_task(&task).await?;
        info!(task_id = %id, "download paused");
        Ok(Some(self.sanitized(&task).await?))
    }

    async fn resume_task(
        &mut self,
        id: Uuid,
        account_hash: &str,
    ) -> Result<Option<SanitizedTask>, StoreError> {
        let Some(mut task) = self.db.load_task(id).await? else {
            return Ok(None);
        };
        if task.account_hash != account_hash || task.status != TaskStatus::Paused {
            return Ok(None);
        }
        // Restart from scratch; nothing of the previous transfer is kept.
        task.status = TaskStatus::Downloading;
        task.progress = 0;
        task.speed = "0 B/s".to_string();
        task.error = None;
        self.db.update_task(&task).await?;
        self.spawn_job(&task);
        info!(task_id = %id, "download resumed");
        Ok(Some(self.sanitized(&task).await?))
    }

    async fn delete_task(&mut self, id: Uuid, account_hash: &str) -> Result<bool, StoreError> {
        let Some(task) = self.db.load_task(id).await? else {
            return Ok(false);
        };
        if task.account_hash != account_hash {
            return Ok(false);
        }
        if let Some(token) = self.jobs.remove(&id) {
            token.cancel();
        }

        let mut keys = BTreeSet::new();
        if let Some(stored) = self.db.artifact_key(id).await? {
            keys.insert(temp_key_for(&stored));
            keys.insert(stored);
        }
        let derived = artifact_key_for(&task.account_hash, &task.software.bundle_id, id);
        keys.insert(temp_key_for(&derived));
        keys.insert(derived);
        self.blob
            .delete_many(&keys.into_iter().collect::<Vec<_>>())
            .await?;

        self.db.delete_task(id).await?;
        info!(task_id = %id, "task deleted");
        Ok(true)
    }

    /// Artifact key for a completed task; the install routes are public by
    /// unguessable UUID, so no tenant check applies.
    async fn artifact_key_public(&self, id: Uuid) -> Result<Option<String>, StoreError> {
        let Some(task) = self.db.load_task(id).await? else {
            return Ok(None);
        };
        if task.status != TaskStatus::Completed {
            return Ok(None);
        }
        self.db.artifact_key(id).await
    }

    async fn get_config(&self) -> Result<CleanupSettings, StoreError> {
        let days = self
            .db
            .get_setting(SETTING_CLEANUP_DAYS)
            .await?
            .and_then(|value| value.parse().ok())
            .unwrap_or(self.cleanup_defaults.auto_cleanup_days);
        let max_mb = self
            .db
            .get_setting(SETTING_CLEANUP_MAX_MB)
            .await?
            .and_then(|value| value.parse().ok())
            .unwrap_or(self.cleanup_defaults.auto_cleanup_max_mb);
        Ok(CleanupSettings {
            auto_cleanup_days: days,
            auto_cleanup_max_mb: max_mb,
        })
    }

    async fn set_config(&self, settings: CleanupSettings) -> Result<(), StoreError> {
        self.db
            .put_setting(SETTING_CLEANUP_DAYS, &settings.auto_cleanup_days.to_string())
            .await?;
        self.db
            .put_setting(
                SETTING_CLEANUP_MAX_MB,
                &settings.auto_cleanup_max_mb.to_string(),
            )
            .await?;
        info!(
            days = settings.auto_cleanup_days,
            max_mb = settings.auto_cleanup_max_mb,
            "cleanup settings updated"
        );
        Ok(())
    }

    async fn storage_totals(&self) -> Result<StorageTotals, StoreError> {
        let mut totals = StorageTotals {
            total_bytes: 0,
            object_count: 0,
        };
        let mut cursor: Option<String> = None;
        loop {
            let page = self.blob.list("", cursor.as_deref()).await?;
            for object in &page.objects {
                totals.total_bytes += object.size;
                totals.object_count += 1;
            }
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(totals)
    }

    async fn job_downloading(&self, id: Uuid) {
        let result: Result<(), StoreError> = async {
            if let Some(mut task) = self.db.load_task(id).await?
                && task.status == TaskStatus::Pending
            {
                task.status = TaskStatus::Downloading;
                self.db.update_task(&task).await?;
            }
            Ok(())
        }
        .await;
        if let Err(err) = result {
            warn!(task_id = %id, error = %err, "failed to mark task downloading");
        }
    }

    async fn job_progress(&self, id: Uuid, progress: u8, speed: String) {
        let result: Result<(), StoreError> = async {
            if let Some(mut task) = self.db.load_task(id).await?
                && task.status == TaskStatus::Downloading
            {
                task.progress = progress;
                task.speed = speed;
                self.db.update_task(&task).await?;
            }
            Ok(())
        }
        .await;
        if let Err(err) = result {
            warn!(task_id = %id, error = %err, "failed to record progress");
        }
    }

    async fn job_injecting(&self, id: Uuid) {
        let result: Result<(), StoreError> = async {
            if let Some(mut task) = self.db.load_task(id).await?
                && task.status == TaskStatus::Downloading
            {
                task.status = TaskStatus::Injecting;
                self.db.update_task(&task).await?;
            }
            Ok(())
        }
        .await;
        if let Err(err) = result {
            warn!(task_id = %id, error = %err, "failed to mark task injecting");
        }
    }

    async fn job_finished(&mut self, id: Uuid, outcome: JobOutcome) {
        // A cancelled job's entry was already removed by whichever path
        // cancelled it (pause, delete, purge); removing here could evict
        // the token of a job spawned by a subsequent resume.
        if !matches!(outcome, JobOutcome::Cancelled) {
            self.jobs.remove(&id);
        }
        let result: Result<(), StoreError> = async {
            match outcome {
                JobOutcome::Completed => {
                    if let Some(mut task) = self.db.load_task(id).await? {
                        let key = artifact_key_for(
                            &task.account_hash,
                            &task.software.bundle_id,
                            task.id,
                        );
                        task.status = TaskStatus::Completed;
                        task.progress = 100;
                        task.speed = "0 B/s".to_string();
                        task.error = None;
                        task.clear_secrets();
                        self.db.update_task(&task).await?;
                        self.db.set_artifact_key(id, &key).await?;
                        info!(task_id = %id, key, "task completed");
                    }
                }
                JobOutcome::Failed(message) => {
                    if let Some(mut task) = self.db.load_task(id).await? {
                        task.status = TaskStatus::Failed;
                        task.speed = "0 B/s".to_string();
                        task.error = Some(message.clone());
                        self.db.update_task(&task).await?;
                        warn!(task_id = %id, error = %message, "task failed");
                    }
                }
                JobOutcome::Cancelled => {
                    // Pause or delete already arranged the record.
                    debug!(task_id = %id, "job cancelled");
                }
            }
            Ok(())
        }
        .await;
        if let Err(err) = result {
            error!(task_id = %id, error = %err, "failed to finalize job");
        }
    }
}

struct JobSpec {
    id: Uuid,
    artifact_key: String,
    download_url: String,
    sinfs: Vec<Sinf>,
    itunes_metadata: Option<String>,
    wants_injection: bool,
}

struct JobProgress {
    tx: mpsc::Sender<StoreCommand>,
    id: Uuid,
}

#[async_trait]
impl ProgressSink for JobProgress {
    async fn report(&self, progress: u8, speed: String) {
        let _ = self
            .tx
            .send(StoreCommand::JobProgress {
                id: self.id,
                progress,
                speed,
            })
            .await;
    }
}

async fn run_job(
    pipeline: Arc<dyn ArtifactPipeline>,
    tx: mpsc::Sender<StoreCommand>,
    job: JobSpec,
    token: CancellationToken,
) {
    let _ = tx.send(StoreCommand::JobDownloading { id: job.id }).await;

    let progress = JobProgress {
        tx: tx.clone(),
        id: job.id,
    };
    match pipeline
        .download(&job.download_url, &job.artifact_key, &token, &progress)
        .await
    {
        Ok(()) => {}
        Err(err) if err.is_cancelled() => {
            let _ = tx
                .send(StoreCommand::JobFinished {
                    id: job.id,
                    outcome: JobOutcome::Cancelled,
                })
                .await;
            return;
        }
        Err(err) => {
            let _ = tx
                .send(StoreCommand::JobFinished {
                    id: job.id,
                    outcome: JobOutcome::Failed(err.to_string()),
                })
                .await;
            return;
        }
    }

    let outcome = if job.wants_injection {
        if token.is_cancelled() {
            JobOutcome::Cancelled
        } else {
            let _ = tx.send(StoreCommand::JobInjecting { id: job.id }).await;
            match pipeline
                .inject(
                    &job.artifact_key,
                    &job.sinfs,
                    job.itunes_metadata.as_deref(),
                )
                .await
            {
                Ok(()) => JobOutcome::Completed,
                Err(err) => JobOutcome::Failed(err.to_string()),
            }
        }
    } else {
        JobOutcome::Completed
    };
    let _ = tx
        .send(StoreCommand::JobFinished {
            id: job.id,
            outcome,
        })
        .await;
}
