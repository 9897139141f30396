//! Commands drained by the store worker.

use pomar_core::{CleanupSettings, CreateDownloadRequest, PackageInfo, SanitizedTask};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::StoreError;
use crate::handle::StorageTotals;
use crate::janitor::CleanupReport;

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

/// One RPC or internal event processed by the single-writer worker.
pub(crate) enum StoreCommand {
    CreateTask {
        request: Box<CreateDownloadRequest>,
        reply: Reply<SanitizedTask>,
    },
    GetTask {
        id: Uuid,
        account_hash: String,
        reply: Reply<Option<SanitizedTask>>,
    },
    ListTasks {
        account_hashes: Vec<String>,
        reply: Reply<Vec<SanitizedTask>>,
    },
    ListPackages {
        account_hashes: Vec<String>,
        reply: Reply<Vec<PackageInfo>>,
    },
    PauseTask {
        id: Uuid,
        account_hash: String,
        reply: Reply<Option<SanitizedTask>>,
    },
    ResumeTask {
        id: Uuid,
        account_hash: String,
        reply: Reply<Option<SanitizedTask>>,
    },
    DeleteTask {
        id: Uuid,
        account_hash: String,
        reply: Reply<bool>,
    },
    GetTaskPublic {
        id: Uuid,
        reply: Reply<Option<SanitizedTask>>,
    },
    GetArtifactKeyPublic {
        id: Uuid,
        reply: Reply<Option<String>>,
    },
    GetConfig {
        reply: Reply<CleanupSettings>,
    },
    SetConfig {
        settings: CleanupSettings,
        reply: Reply<()>,
    },
    GetPasswordHash {
        reply: Reply<Option<String>>,
    },
    SetPasswordHash {
        hash: String,
        reply: Reply<()>,
    },
    SetPasswordHashIfAbsent {
        hash: String,
        reply: Reply<bool>,
    },
    RunCleanup {
        reply: Reply<CleanupReport>,
    },
    StorageTotals {
        reply: Reply<StorageTotals>,
    },

    // Internal events from download jobs; fire-and-forget.
    JobDownloading {
        id: Uuid,
    },
    JobProgress {
        id: Uuid,
        progress: u8,
        speed: String,
    },
    JobInjecting {
        id: Uuid,
    },
    JobFinished {
        id: Uuid,
        outcome: JobOutcome,
    },
}

/// Terminal result of one download job.
pub(crate) enum JobOutcome {
    Completed,
    Failed(String),
    Cancelled,
}
