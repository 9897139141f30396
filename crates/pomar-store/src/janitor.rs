//! Storage janitor: age cap, size cap, and orphan sweep.
//!
//! Runs inside the store worker so every purge is serialized with the rest
//! of the RPCs. The three phases share a single blob listing; per-task
//! failures are logged and never abort the remaining phases.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{Duration, Utc};
use pomar_blob::BlobStore;
use pomar_core::{CleanupSettings, DownloadTask};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::Db;
use crate::error::StoreError;
use crate::keys::{artifact_key_for, temp_key_for};

const MIB: u64 = 1024 * 1024;

/// Counts reported after a cleanup run.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    /// Tasks purged by the age phase.
    pub removed_by_age: usize,
    /// Tasks purged by the quota phase.
    pub removed_by_quota: usize,
    /// Unreferenced blobs removed by the orphan phase.
    pub orphans_deleted: u64,
    /// Total stored bytes after the sweep, in MiB.
    pub total_size_mb: f64,
}

pub(crate) async fn run(
    db: &Db,
    blob: &dyn BlobStore,
    jobs: &mut HashMap<Uuid, CancellationToken>,
    settings: CleanupSettings,
) -> Result<CleanupReport, StoreError> {
    // One listing feeds every phase.
    let mut sizes: HashMap<String, u64> = HashMap::new();
    let mut total: u64 = 0;
    let mut cursor: Option<String> = None;
    loop {
        let page = blob.list("", cursor.as_deref()).await?;
        for object in page.objects {
            total += object.size;
            sizes.insert(object.key, object.size);
        }
        match page.cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    let tasks = db.all_tasks().await?;
    let mut purged: HashSet<Uuid> = HashSet::new();
    let now = Utc::now();

    // Phase 1: age cap.
    let mut removed_by_age = 0;
    if settings.auto_cleanup_days > 0 {
        let cutoff = now - Duration::days(i64::from(settings.auto_cleanup_days));
        for task in &tasks {
            if task.created_at >= cutoff {
                continue;
            }
            match purge(db, blob, jobs, task, &mut sizes, &mut total).await {
                Ok(()) => {
                    purged.insert(task.id);
                    removed_by_age += 1;
                }
                Err(err) => warn!(task_id = %task.id, error = %err, "age purge failed"),
            }
        }
    }

    // Phase 2: size cap, oldest first.
    let mut removed_by_quota = 0;
    if settings.auto_cleanup_max_mb > 0 {
        let cap = settings.auto_cleanup_max_mb * MIB;
        if total > cap {
            let mut survivors: Vec<&DownloadTask> =
                tasks.iter().filter(|task| !purged.contains(&task.id)).collect();
            survivors.sort_by_key(|task| task.created_at);
            for task in survivors {
                if total <= cap {
                    break;
                }
                match purge(db, blob, jobs, task, &mut sizes, &mut total).await {
                    Ok(()) => {
                        purged.insert(task.id);
                        removed_by_quota += 1;
                    }
                    Err(err) => warn!(task_id = %task.id, error = %err, "quota purge failed"),
                }
            }
        }
    }

    // Phase 3: orphans always run.
    let referenced: HashSet<String> = db
        .all_artifact_keys()
        .await?
        .into_iter()
        .map(|(_, key)| key)
        .collect();
    let orphan_keys: Vec<String> = sizes
        .keys()
        .filter(|key| !referenced.contains(*key))
        .cloned()
        .collect();
    let mut orphans_deleted = 0;
    if !orphan_keys.is_empty() {
        match blob.delete_many(&orphan_keys).await {
            Ok(deleted) => {
                orphans_deleted = deleted;
                for key in &orphan_keys {
                    if let Some(size) = sizes.remove(key) {
                        total -= size;
                    }
                }
            }
            Err(err) => warn!(error = %err, count = orphan_keys.len(), "orphan sweep failed"),
        }
    }

    #[expect(
        clippy::cast_precision_loss,
        reason = "reported storage totals are informational"
    )]
    let report = CleanupReport {
        removed_by_age,
        removed_by_quota,
        orphans_deleted,
        total_size_mb: total as f64 / MIB as f64,
    };
    info!(
        removed_by_age,
        removed_by_quota, orphans_deleted, total_size_mb = report.total_size_mb, "cleanup finished"
    );
    Ok(report)
}

/// Purge one task: cancel its job, delete every key it may own (stored,
/// derived, and their `.new` siblings, collapsed as a set), then erase the
/// records.
async fn purge(
    db: &Db,
    blob: &dyn BlobStore,
    jobs: &mut HashMap<Uuid, CancellationToken>,
    task: &DownloadTask,
    sizes: &mut HashMap<String, u64>,
    total: &mut u64,
) -> Result<(), StoreError> {
    if let Some(token) = jobs.remove(&task.id) {
        token.cancel();
    }

    let mut keys = BTreeSet::new();
    if let Some(stored) = db.artifact_key(task.id).await? {
        keys.insert(temp_key_for(&stored));
        keys.insert(stored);
    }
    let derived = artifact_key_for(&task.account_hash, &task.software.bundle_id, task.id);
    keys.insert(temp_key_for(&derived));
    keys.insert(derived);

    for key in &keys {
        if let Some(size) = sizes.remove(key) {
            *total -= size;
        }
    }
    blob.delete_many(&keys.into_iter().collect::<Vec<_>>())
        .await?;
    db.delete_task(task.id).await?;
    info!(task_id = %task.id, "task purged");
    Ok(())
}
