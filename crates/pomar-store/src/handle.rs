//! Public handle to the store worker.
//!
//! The handle is cheap to clone; every call pushes a command onto the
//! worker's channel and awaits a oneshot reply.

use std::sync::Arc;

use pomar_blob::BlobStore;
use pomar_core::{CleanupSettings, CreateDownloadRequest, PackageInfo, SanitizedTask};
use pomar_pipeline::ArtifactPipeline;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::command::StoreCommand;
use crate::db::Db;
use crate::error::StoreError;
use crate::janitor::CleanupReport;
use crate::worker;

const COMMAND_BACKLOG: usize = 256;

/// Store construction knobs.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Cleanup defaults applied when no override is persisted; typically
    /// sourced from `AUTO_CLEANUP_DAYS` / `AUTO_CLEANUP_MAX_MB`.
    pub cleanup_defaults: CleanupSettings,
}

/// Aggregate storage numbers reported by the settings endpoint.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageTotals {
    /// Sum of all stored object sizes in bytes.
    pub total_bytes: u64,
    /// Number of stored objects.
    pub object_count: u64,
}

/// Handle to the single-writer task store.
#[derive(Clone)]
pub struct TaskStore {
    tx: mpsc::Sender<StoreCommand>,
}

impl TaskStore {
    /// Open the database, start the worker, and return the handle.
    ///
    /// # Errors
    ///
    /// Fails when the schema cannot be applied.
    pub async fn spawn(
        pool: SqlitePool,
        blob: Arc<dyn BlobStore>,
        pipeline: Arc<dyn ArtifactPipeline>,
        settings: StoreSettings,
    ) -> Result<Self, StoreError> {
        let db = Db::open(pool).await?;
        let (tx, rx) = mpsc::channel(COMMAND_BACKLOG);
        worker::spawn(
            db,
            blob,
            pipeline,
            settings.cleanup_defaults,
            tx.clone(),
            rx,
        );
        Ok(Self { tx })
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, StoreError>>) -> StoreCommand,
    ) -> Result<T, StoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StoreError::WorkerGone)?;
        reply_rx.await.map_err(|_| StoreError::WorkerGone)?
    }

    /// Validate, dedup, persist, and start downloading a new task.
    ///
    /// # Errors
    ///
    /// [`StoreError::Invalid`] on malformed input, [`StoreError::Duplicate`]
    /// when a non-failed task already covers this (tenant, bundle, version).
    pub async fn create_task(
        &self,
        request: CreateDownloadRequest,
    ) -> Result<SanitizedTask, StoreError> {
        self.call(|reply| StoreCommand::CreateTask {
            request: Box::new(request),
            reply,
        })
        .await
    }

    /// Tenant-scoped lookup; `None` for unknown ids and tenant mismatches
    /// alike.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub async fn get_task(
        &self,
        id: Uuid,
        account_hash: &str,
    ) -> Result<Option<SanitizedTask>, StoreError> {
        self.call(|reply| StoreCommand::GetTask {
            id,
            account_hash: account_hash.to_string(),
            reply,
        })
        .await
    }

    /// Union of the given tenants' tasks, each in creation order.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub async fn list_tasks(
        &self,
        account_hashes: Vec<String>,
    ) -> Result<Vec<SanitizedTask>, StoreError> {
        self.call(|reply| StoreCommand::ListTasks {
            account_hashes,
            reply,
        })
        .await
    }

    /// Completed tasks only, with artifact sizes.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub async fn list_packages(
        &self,
        account_hashes: Vec<String>,
    ) -> Result<Vec<PackageInfo>, StoreError> {
        self.call(|reply| StoreCommand::ListPackages {
            account_hashes,
            reply,
        })
        .await
    }

    /// Pause a downloading task; `None` when the task is not pausable by
    /// this tenant.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub async fn pause_task(
        &self,
        id: Uuid,
        account_hash: &str,
    ) -> Result<Option<SanitizedTask>, StoreError> {
        self.call(|reply| StoreCommand::PauseTask {
            id,
            account_hash: account_hash.to_string(),
            reply,
        })
        .await
    }

    /// Resume a paused task from scratch; `None` when not resumable.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub async fn resume_task(
        &self,
        id: Uuid,
        account_hash: &str,
    ) -> Result<Option<SanitizedTask>, StoreError> {
        self.call(|reply| StoreCommand::ResumeTask {
            id,
            account_hash: account_hash.to_string(),
            reply,
        })
        .await
    }

    /// Cancel, delete the artifact, and erase the records.
    ///
    /// # Errors
    ///
    /// Propagates persistence and blob failures.
    pub async fn delete_task(&self, id: Uuid, account_hash: &str) -> Result<bool, StoreError> {
        self.call(|reply| StoreCommand::DeleteTask {
            id,
            account_hash: account_hash.to_string(),
            reply,
        })
        .await
    }

    /// Public-by-UUID lookup used by the install routes; no tenant check.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub async fn get_task_public(&self, id: Uuid) -> Result<Option<SanitizedTask>, StoreError> {
        self.call(|reply| StoreCommand::GetTaskPublic { id, reply }).await
    }

    /// Artifact key for a completed task, public by UUID.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub async fn artifact_key_public(&self, id: Uuid) -> Result<Option<String>, StoreError> {
        self.call(|reply| StoreCommand::GetArtifactKeyPublic { id, reply })
            .await
    }

    /// Current cleanup settings (persisted override or defaults).
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub async fn get_config(&self) -> Result<CleanupSettings, StoreError> {
        self.call(|reply| StoreCommand::GetConfig { reply }).await
    }

    /// Persist cleanup settings.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub async fn set_config(&self, settings: CleanupSettings) -> Result<(), StoreError> {
        self.call(|reply| StoreCommand::SetConfig { settings, reply })
            .await
    }

    /// Stored password hash, when set up.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub async fn get_password_hash(&self) -> Result<Option<String>, StoreError> {
        self.call(|reply| StoreCommand::GetPasswordHash { reply }).await
    }

    /// Replace the stored password hash.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub async fn set_password_hash(&self, hash: String) -> Result<(), StoreError> {
        self.call(|reply| StoreCommand::SetPasswordHash { hash, reply })
            .await
    }

    /// Compare-and-set used by initial setup; returns whether the hash was
    /// written.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub async fn set_password_hash_if_absent(&self, hash: String) -> Result<bool, StoreError> {
        self.call(|reply| StoreCommand::SetPasswordHashIfAbsent { hash, reply })
            .await
    }

    /// Run the janitor now with the effective settings.
    ///
    /// # Errors
    ///
    /// Propagates listing failures; per-task purge failures are logged and
    /// absorbed.
    pub async fn run_cleanup(&self) -> Result<CleanupReport, StoreError> {
        self.call(|reply| StoreCommand::RunCleanup { reply }).await
    }

    /// Aggregate storage totals for the settings endpoint.
    ///
    /// # Errors
    ///
    /// Propagates blob listing failures.
    pub async fn storage_totals(&self) -> Result<StorageTotals, StoreError> {
        self.call(|reply| StoreCommand::StorageTotals { reply }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;
    use bytes::Bytes;
    use pomar_blob::MemoryBlobStore;
    use pomar_core::{Sinf, Software, TaskStatus};
    use pomar_pipeline::{PipelineError, ProgressSink};
    use sqlx::sqlite::SqlitePoolOptions;
    use tokio_util::sync::CancellationToken;

    #[derive(Clone, Copy)]
    enum Behavior {
        Complete { size: usize },
        Fail,
        WaitForCancel,
    }

    struct StubPipeline {
        blob: MemoryBlobStore,
        behavior: Mutex<Behavior>,
    }

    impl StubPipeline {
        fn new(blob: MemoryBlobStore, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                blob,
                behavior: Mutex::new(behavior),
            })
        }

        fn set(&self, behavior: Behavior) {
            *self.behavior.lock().unwrap() = behavior;
        }
    }

    #[async_trait]
    impl ArtifactPipeline for StubPipeline {
        async fn download(
            &self,
            _url: &str,
            artifact_key: &str,
            cancel: &CancellationToken,
            progress: &dyn ProgressSink,
        ) -> Result<(), PipelineError> {
            let behavior = *self.behavior.lock().unwrap();
            match behavior {
                Behavior::Complete { size } => {
                    progress.report(50, "1.0 MB/s".to_string()).await;
                    self.blob
                        .put(artifact_key, Bytes::from(vec![0u8; size]))
                        .await
                        .map_err(PipelineError::from)
                }
                Behavior::Fail => Err(PipelineError::UpstreamStatus { status: 502 }),
                Behavior::WaitForCancel => {
                    cancel.cancelled().await;
                    Err(PipelineError::Cancelled)
                }
            }
        }

        async fn inject(
            &self,
            _artifact_key: &str,
            _sinfs: &[Sinf],
            _itunes_metadata: Option<&str>,
        ) -> Result<(), PipelineError> {
            Ok(())
        }
    }

    fn software(bundle_id: &str, version: &str) -> Software {
        Software {
            id: 1,
            bundle_id: bundle_id.into(),
            name: "Demo App".into(),
            version: version.into(),
            price: None,
            artist_name: "Demo".into(),
            seller_name: "Demo".into(),
            description: String::new(),
            average_user_rating: 0.0,
            user_rating_count: 0,
            artwork_url: String::new(),
            screenshot_urls: Vec::new(),
            minimum_os_version: "16.0".into(),
            file_size_bytes: None,
            release_date: String::new(),
            release_notes: None,
            formatted_price: None,
            primary_genre_name: String::new(),
        }
    }

    fn request(bundle_id: &str, version: &str, hash: &str) -> CreateDownloadRequest {
        CreateDownloadRequest {
            software: software(bundle_id, version),
            account_hash: hash.into(),
            download_url: "https://cdn.apple.com/pkg.ipa".into(),
            sinfs: vec![Sinf {
                id: 0,
                sinf: "U0lORg==".into(),
            }],
            itunes_metadata: None,
        }
    }

    async fn open_store(
        behavior: Behavior,
    ) -> Result<(TaskStore, MemoryBlobStore, Arc<StubPipeline>, SqlitePool)> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let blob = MemoryBlobStore::new();
        let pipeline = StubPipeline::new(blob.clone(), behavior);
        let store = TaskStore::spawn(
            pool.clone(),
            Arc::new(blob.clone()),
            pipeline.clone(),
            StoreSettings {
                cleanup_defaults: CleanupSettings {
                    auto_cleanup_days: 0,
                    auto_cleanup_max_mb: 0,
                },
            },
        )
        .await?;
        Ok((store, blob, pipeline, pool))
    }

    async fn wait_for_status(
        store: &TaskStore,
        id: Uuid,
        hash: &str,
        status: TaskStatus,
    ) -> SanitizedTask {
        for _ in 0..500 {
            if let Some(task) = store.get_task(id, hash).await.unwrap()
                && task.status == status
            {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {id} never reached {status:?}");
    }

    #[tokio::test]
    async fn create_runs_to_completion_and_clears_secrets() -> Result<()> {
        let (store, blob, _pipeline, _pool) = open_store(Behavior::Complete { size: 1024 }).await?;

        let created = store.create_task(request("com.x.y", "1.2", "aaaaaaaa")).await?;
        assert!(matches!(
            created.status,
            TaskStatus::Pending | TaskStatus::Downloading
        ));

        let done = wait_for_status(&store, created.id, "aaaaaaaa", TaskStatus::Completed).await;
        assert_eq!(done.progress, 100);
        assert!(done.has_file);
        assert_eq!(done.file_size, Some(1024));

        let json = serde_json::to_value(&done)?;
        assert!(json.get("downloadURL").is_none());
        assert!(json.get("sinfs").is_none());
        assert!(json.get("iTunesMetadata").is_none());

        let key = store.artifact_key_public(created.id).await?.unwrap();
        assert_eq!(
            key,
            format!("packages/aaaaaaaa/com.x.y/{}.ipa", created.id)
        );
        assert!(blob.object(&key).is_some());

        let public = store.get_task_public(created.id).await?.unwrap();
        assert!(public.has_file);
        Ok(())
    }

    #[tokio::test]
    async fn tenant_mismatch_is_indistinguishable_from_missing() -> Result<()> {
        let (store, _blob, _pipeline, _pool) = open_store(Behavior::Complete { size: 16 }).await?;
        let created = store.create_task(request("com.x.y", "1.0", "aaaaaaaa")).await?;
        wait_for_status(&store, created.id, "aaaaaaaa", TaskStatus::Completed).await;

        assert!(store.get_task(created.id, "bbbbbbbb").await?.is_none());
        assert!(store.get_task(Uuid::new_v4(), "aaaaaaaa").await?.is_none());
        // The public-by-UUID path has no tenant gate.
        assert!(store.get_task_public(created.id).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_active_tasks_are_rejected() -> Result<()> {
        let (store, _blob, _pipeline, _pool) = open_store(Behavior::WaitForCancel).await?;
        let first = store.create_task(request("com.x.y", "1.0", "aaaaaaaa")).await?;

        let err = store
            .create_task(request("com.x.y", "1.0", "aaaaaaaa"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate));

        // A different version of the same bundle is fine.
        store.create_task(request("com.x.y", "2.0", "aaaaaaaa")).await?;
        // And so is the same version for another tenant.
        store.create_task(request("com.x.y", "1.0", "bbbbbbbb")).await?;

        let _running = wait_for_status(&store, first.id, "aaaaaaaa", TaskStatus::Downloading).await;
        Ok(())
    }

    #[tokio::test]
    async fn failed_tasks_can_be_recreated() -> Result<()> {
        let (store, _blob, pipeline, _pool) = open_store(Behavior::Fail).await?;
        let first = store.create_task(request("com.x.y", "1.0", "aaaaaaaa")).await?;
        let failed = wait_for_status(&store, first.id, "aaaaaaaa", TaskStatus::Failed).await;
        assert!(failed.error.is_some());

        pipeline.set(Behavior::Complete { size: 8 });
        let second = store.create_task(request("com.x.y", "1.0", "aaaaaaaa")).await?;
        wait_for_status(&store, second.id, "aaaaaaaa", TaskStatus::Completed).await;
        // The failed record is retained for inspection.
        assert!(store.get_task(first.id, "aaaaaaaa").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn pause_resume_cycle() -> Result<()> {
        let (store, _blob, pipeline, _pool) = open_store(Behavior::WaitForCancel).await?;
        let created = store.create_task(request("com.x.y", "1.0", "aaaaaaaa")).await?;
        wait_for_status(&store, created.id, "aaaaaaaa", TaskStatus::Downloading).await;

        let paused = store.pause_task(created.id, "aaaaaaaa").await?.unwrap();
        assert_eq!(paused.status, TaskStatus::Paused);
        // Pausing a non-downloading task is a no-op.
        assert!(store.pause_task(created.id, "aaaaaaaa").await?.is_none());
        // Wrong tenant cannot pause.
        assert!(store.pause_task(created.id, "bbbbbbbb").await?.is_none());

        pipeline.set(Behavior::Complete { size: 32 });
        let resumed = store.resume_task(created.id, "aaaaaaaa").await?.unwrap();
        assert_eq!(resumed.status, TaskStatus::Downloading);
        wait_for_status(&store, created.id, "aaaaaaaa", TaskStatus::Completed).await;
        Ok(())
    }

    #[tokio::test]
    async fn delete_removes_records_and_artifacts() -> Result<()> {
        let (store, blob, _pipeline, _pool) = open_store(Behavior::Complete { size: 64 }).await?;
        let created = store.create_task(request("com.x.y", "1.0", "aaaaaaaa")).await?;
        wait_for_status(&store, created.id, "aaaaaaaa", TaskStatus::Completed).await;
        let key = store.artifact_key_public(created.id).await?.unwrap();

        assert!(!store.delete_task(created.id, "bbbbbbbb").await?);
        assert!(store.delete_task(created.id, "aaaaaaaa").await?);
        assert!(store.get_task(created.id, "aaaaaaaa").await?.is_none());
        assert!(blob.object(&key).is_none());
        assert!(!store.delete_task(created.id, "aaaaaaaa").await?);
        Ok(())
    }

    #[tokio::test]
    async fn config_and_password_hash_round_trip() -> Result<()> {
        let (store, _blob, _pipeline, _pool) = open_store(Behavior::Fail).await?;

        let defaults = store.get_config().await?;
        assert_eq!(defaults.auto_cleanup_days, 0);

        store
            .set_config(CleanupSettings {
                auto_cleanup_days: 7,
                auto_cleanup_max_mb: 2048,
            })
            .await?;
        let updated = store.get_config().await?;
        assert_eq!(updated.auto_cleanup_days, 7);
        assert_eq!(updated.auto_cleanup_max_mb, 2048);

        assert!(store.get_password_hash().await?.is_none());
        assert!(store.set_password_hash_if_absent("first".into()).await?);
        assert!(!store.set_password_hash_if_absent("second".into()).await?);
        assert_eq!(store.get_password_hash().await?.as_deref(), Some("first"));
        store.set_password_hash("rotated".into()).await?;
        assert_eq!(store.get_password_hash().await?.as_deref(), Some("rotated"));
        Ok(())
    }

    async fn age_task_record(pool: &SqlitePool, id: Uuid, days_old: i64) -> Result<()> {
        use sqlx::Row;
        let row = sqlx::query("SELECT record FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_one(pool)
            .await?;
        let mut record: serde_json::Value = serde_json::from_str(&row.get::<String, _>(0))?;
        let old = chrono::Utc::now() - chrono::Duration::days(days_old);
        record["createdAt"] = serde_json::Value::String(old.to_rfc3339());
        sqlx::query("UPDATE tasks SET created_at = ?, record = ? WHERE id = ?")
            .bind(old.to_rfc3339())
            .bind(record.to_string())
            .bind(id.to_string())
            .execute(pool)
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn janitor_age_phase_purges_old_tasks() -> Result<()> {
        let (store, blob, _pipeline, pool) = open_store(Behavior::Complete { size: 100 }).await?;
        let old = store.create_task(request("com.x.old", "1.0", "aaaaaaaa")).await?;
        let fresh = store.create_task(request("com.x.new", "1.0", "aaaaaaaa")).await?;
        wait_for_status(&store, old.id, "aaaaaaaa", TaskStatus::Completed).await;
        wait_for_status(&store, fresh.id, "aaaaaaaa", TaskStatus::Completed).await;
        age_task_record(&pool, old.id, 30).await?;

        store
            .set_config(CleanupSettings {
                auto_cleanup_days: 7,
                auto_cleanup_max_mb: 0,
            })
            .await?;
        let report = store.run_cleanup().await?;
        assert_eq!(report.removed_by_age, 1);
        assert_eq!(report.removed_by_quota, 0);

        assert!(store.get_task(old.id, "aaaaaaaa").await?.is_none());
        assert!(store.get_task(fresh.id, "aaaaaaaa").await?.is_some());
        assert_eq!(blob.object_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn janitor_quota_phase_purges_oldest_first() -> Result<()> {
        // Ten completed artifacts of 300 KiB each; a 1 MiB cap keeps the
        // three newest.
        let (store, _blob, _pipeline, _pool) =
            open_store(Behavior::Complete { size: 300 * 1024 }).await?;
        let mut ids = Vec::new();
        for i in 0..10 {
            let created = store
                .create_task(request(&format!("com.x.app{i}"), "1.0", "aaaaaaaa"))
                .await?;
            wait_for_status(&store, created.id, "aaaaaaaa", TaskStatus::Completed).await;
            ids.push(created.id);
        }

        store
            .set_config(CleanupSettings {
                auto_cleanup_days: 0,
                auto_cleanup_max_mb: 1,
            })
            .await?;
        let report = store.run_cleanup().await?;
        assert_eq!(report.removed_by_quota, 7);
        assert!(report.total_size_mb <= 1.0);

        for (i, id) in ids.iter().enumerate() {
            let present = store.get_task(*id, "aaaaaaaa").await?.is_some();
            assert_eq!(present, i >= 7, "task {i} presence");
        }
        Ok(())
    }

    #[tokio::test]
    async fn janitor_orphan_phase_deletes_unreferenced_blobs() -> Result<()> {
        let (store, blob, _pipeline, _pool) = open_store(Behavior::Complete { size: 64 }).await?;
        let created = store.create_task(request("com.x.y", "1.0", "aaaaaaaa")).await?;
        wait_for_status(&store, created.id, "aaaaaaaa", TaskStatus::Completed).await;
        let referenced = store.artifact_key_public(created.id).await?.unwrap();

        blob.put(
            "packages/bbbbbbbb/foo/zzz.ipa",
            Bytes::from_static(b"orphan"),
        )
        .await?;

        let report = store.run_cleanup().await?;
        assert_eq!(report.orphans_deleted, 1);
        assert!(blob.object("packages/bbbbbbbb/foo/zzz.ipa").is_none());
        assert!(blob.object(&referenced).is_some());
        Ok(())
    }

    #[tokio::test]
    async fn storage_totals_sum_all_objects() -> Result<()> {
        let (store, blob, _pipeline, _pool) = open_store(Behavior::Fail).await?;
        blob.put("packages/a/b/one.ipa", Bytes::from(vec![0u8; 100])).await?;
        blob.put("packages/a/b/two.ipa", Bytes::from(vec![0u8; 50])).await?;
        let totals = store.storage_totals().await?;
        assert_eq!(totals.total_bytes, 150);
        assert_eq!(totals.object_count, 2);
        Ok(())
    }
}
