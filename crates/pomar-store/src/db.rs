//! SQLite persistence for task records, artifact keys, and settings.
//!
//! The key-value contract (`task:<id>`, `r2key:<id>`, `accounts:<hash>`,
//! `config:*`, `auth:password_hash`) maps onto three tables; the per-account
//! ordering is rowid insertion order. Consistency between tables is the
//! worker's job, not the database's: every multi-row mutation happens
//! within one serialized command.

use pomar_core::{DownloadTask, TaskStatus};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::StoreError;

/// Settings-table key for the cleanup age knob.
pub(crate) const SETTING_CLEANUP_DAYS: &str = "config:autoCleanupDays";
/// Settings-table key for the cleanup size knob.
pub(crate) const SETTING_CLEANUP_MAX_MB: &str = "config:autoCleanupMaxMB";
/// Settings-table key for the password hash.
pub(crate) const SETTING_PASSWORD_HASH: &str = "auth:password_hash";

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    account_hash TEXT NOT NULL,
    bundle_id TEXT NOT NULL,
    version TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    record TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS tasks_account_idx ON tasks(account_hash);
CREATE TABLE IF NOT EXISTS artifact_keys (
    task_id TEXT PRIMARY KEY,
    key TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

#[derive(Clone)]
pub(crate) struct Db {
    pool: SqlitePool,
}

fn decode_record(record: &str) -> Result<DownloadTask, StoreError> {
    serde_json::from_str(record).map_err(|err| StoreError::Corrupt {
        what: format!("task record: {err}"),
    })
}

impl Db {
    pub(crate) async fn open(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub(crate) async fn insert_task(&self, task: &DownloadTask) -> Result<(), StoreError> {
        let record = serde_json::to_string(task).map_err(|err| StoreError::Corrupt {
            what: format!("task encode: {err}"),
        })?;
        sqlx::query(
            "INSERT INTO tasks (id, account_hash, bundle_id, version, status, created_at, record) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task.id.to_string())
        .bind(&task.account_hash)
        .bind(&task.software.bundle_id)
        .bind(&task.software.version)
        .bind(task.status.as_str())
        .bind(task.created_at.to_rfc3339())
        .bind(record)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist the full record; a no-op when the task was deleted
    /// concurrently (the row is simply gone).
    pub(crate) async fn update_task(&self, task: &DownloadTask) -> Result<(), StoreError> {
        let record = serde_json::to_string(task).map_err(|err| StoreError::Corrupt {
            what: format!("task encode: {err}"),
        })?;
        sqlx::query("UPDATE tasks SET status = ?, created_at = ?, record = ? WHERE id = ?")
            .bind(task.status.as_str())
            .bind(task.created_at.to_rfc3339())
            .bind(record)
            .bind(task.id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub(crate) async fn load_task(&self, id: Uuid) -> Result<Option<DownloadTask>, StoreError> {
        let row = sqlx::query("SELECT record FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| decode_record(row.get::<String, _>(0).as_str()))
            .transpose()
    }

    pub(crate) async fn delete_task(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM artifact_keys WHERE task_id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Tasks for one tenant, in creation (insertion) order.
    pub(crate) async fn tasks_for_account(
        &self,
        account_hash: &str,
    ) -> Result<Vec<DownloadTask>, StoreError> {
        let rows = sqlx::query("SELECT record FROM tasks WHERE account_hash = ? ORDER BY rowid")
            .bind(account_hash)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| decode_record(row.get::<String, _>(0).as_str()))
            .collect()
    }

    pub(crate) async fn all_tasks(&self) -> Result<Vec<DownloadTask>, StoreError> {
        let rows = sqlx::query("SELECT record FROM tasks ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| decode_record(row.get::<String, _>(0).as_str()))
            .collect()
    }

    /// Whether a non-failed task exists for (tenant, bundle, version).
    pub(crate) async fn has_active_duplicate(
        &self,
        account_hash: &str,
        bundle_id: &str,
        version: &str,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) FROM tasks \
             WHERE account_hash = ? AND bundle_id = ? AND version = ? AND status != ?",
        )
        .bind(account_hash)
        .bind(bundle_id)
        .bind(version)
        .bind(TaskStatus::Failed.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>(0) > 0)
    }

    pub(crate) async fn set_artifact_key(&self, id: Uuid, key: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO artifact_keys (task_id, key) VALUES (?, ?) \
             ON CONFLICT(task_id) DO UPDATE SET key = excluded.key",
        )
        .bind(id.to_string())
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub(crate) async fn artifact_key(&self, id: Uuid) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT key FROM artifact_keys WHERE task_id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get::<String, _>(0)))
    }

    pub(crate) async fn all_artifact_keys(&self) -> Result<Vec<(Uuid, String)>, StoreError> {
        let rows = sqlx::query("SELECT task_id, key FROM artifact_keys")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let id = Uuid::parse_str(row.get::<String, _>(0).as_str()).map_err(|err| {
                    StoreError::Corrupt {
                        what: format!("artifact key task id: {err}"),
                    }
                })?;
                Ok((id, row.get::<String, _>(1)))
            })
            .collect()
    }

    pub(crate) async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get::<String, _>(0)))
    }

    pub(crate) async fn put_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Compare-and-set used during initial setup: writes only when the key
    /// is absent. Returns whether the write happened.
    pub(crate) async fn put_setting_if_absent(
        &self,
        key: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?) ON CONFLICT(key) DO NOTHING",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
