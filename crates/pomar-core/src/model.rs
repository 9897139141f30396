//! Domain records for software descriptors, download tasks, and their
//! sanitized API projections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Software descriptor describing one App Store application.
///
/// The record is treated as opaque display data except for `bundle_id` and
/// `version` (deduplication) and `name` (artifact file naming).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Software {
    /// Numeric store track identifier.
    pub id: i64,
    /// Application bundle identifier, e.g. `com.example.app`.
    #[serde(rename = "bundleID")]
    pub bundle_id: String,
    /// Human-readable application name.
    pub name: String,
    /// Version string as reported by the store.
    pub version: String,
    /// Price in the storefront currency, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    /// Artist (developer) display name.
    #[serde(default)]
    pub artist_name: String,
    /// Seller display name.
    #[serde(default)]
    pub seller_name: String,
    /// Store description text.
    #[serde(default)]
    pub description: String,
    /// Average user rating, 0.0 when unrated.
    #[serde(default)]
    pub average_user_rating: f64,
    /// Number of user ratings.
    #[serde(default)]
    pub user_rating_count: i64,
    /// Icon artwork URL.
    #[serde(rename = "artworkUrl", default)]
    pub artwork_url: String,
    /// Screenshot URLs.
    #[serde(default)]
    pub screenshot_urls: Vec<String>,
    /// Minimum supported OS version.
    #[serde(default)]
    pub minimum_os_version: String,
    /// Declared package size in bytes, as a decimal string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<String>,
    /// Release date of the current version.
    #[serde(default)]
    pub release_date: String,
    /// Release notes for the current version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
    /// Formatted price string, e.g. `Free`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_price: Option<String>,
    /// Primary genre display name.
    #[serde(default)]
    pub primary_genre_name: String,
}

/// DRM signature blob paired with its position index inside the bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sinf {
    /// Position index supplied by the client.
    pub id: i64,
    /// Base64-encoded opaque signature bytes.
    pub sinf: String,
}

/// Lifecycle state of a download task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, download not yet started.
    Pending,
    /// Streaming from the CDN into the blob store.
    Downloading,
    /// Cancelled by the tenant; resumable from scratch.
    Paused,
    /// Rewriting the archive tail with SINF and metadata entries.
    Injecting,
    /// Artifact published; secrets cleared.
    Completed,
    /// Terminal failure; record retained for inspection.
    Failed,
}

impl TaskStatus {
    /// Render the status as its lowercase wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Injecting => "injecting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse a lowercase status label.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "downloading" => Some(Self::Downloading),
            "paused" => Some(Self::Paused),
            "injecting" => Some(Self::Injecting),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Persistent download task record.
///
/// `download_url`, `sinfs`, and `itunes_metadata` are secrets: they are
/// cleared on transition to [`TaskStatus::Completed`] and never serialized
/// into API responses (see [`DownloadTask::sanitize`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadTask {
    /// Task identity; a freshly generated UUID.
    pub id: Uuid,
    /// Software descriptor supplied at creation.
    pub software: Software,
    /// Opaque tenant identifier, at least eight characters.
    pub account_hash: String,
    /// Signed CDN URL for the encrypted package.
    #[serde(rename = "downloadURL", default)]
    pub download_url: String,
    /// SINF blobs to inject after download.
    #[serde(default)]
    pub sinfs: Vec<Sinf>,
    /// Base64-encoded XML metadata plist, when provided.
    #[serde(rename = "iTunesMetadata", skip_serializing_if = "Option::is_none")]
    pub itunes_metadata: Option<String>,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Completion percentage, 0 to 100.
    pub progress: u8,
    /// Human-readable transfer speed.
    pub speed: String,
    /// Failure detail when `status` is `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl DownloadTask {
    /// Build a fresh pending task from a validated creation request.
    #[must_use]
    pub fn new(request: CreateDownloadRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            software: request.software,
            account_hash: request.account_hash,
            download_url: request.download_url,
            sinfs: request.sinfs,
            itunes_metadata: request.itunes_metadata,
            status: TaskStatus::Pending,
            progress: 0,
            speed: "0 B/s".to_string(),
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the injection step has anything to do for this task.
    #[must_use]
    pub fn wants_injection(&self) -> bool {
        !self.sinfs.is_empty()
            || self
                .itunes_metadata
                .as_ref()
                .is_some_and(|meta| !meta.is_empty())
    }

    /// Clear secret fields; called on the transition to `completed`.
    pub fn clear_secrets(&mut self) {
        self.download_url = String::new();
        self.sinfs = Vec::new();
        self.itunes_metadata = None;
    }

    /// Project the record into its tenant-visible shape.
    ///
    /// The projection is the hard sanitization boundary: secrets are replaced
    /// by `has_file` plus an optional artifact size.
    #[must_use]
    pub fn sanitize(&self, file_size: Option<u64>) -> SanitizedTask {
        SanitizedTask {
            id: self.id,
            software: self.software.clone(),
            account_hash: self.account_hash.clone(),
            status: self.status,
            progress: self.progress,
            speed: self.speed.clone(),
            error: self.error.clone(),
            has_file: file_size.is_some(),
            file_size,
            created_at: self.created_at,
        }
    }
}

/// Tenant-visible projection of a [`DownloadTask`], with secrets removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizedTask {
    /// Task identity.
    pub id: Uuid,
    /// Software descriptor.
    pub software: Software,
    /// Tenant identifier.
    pub account_hash: String,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Completion percentage, 0 to 100.
    pub progress: u8,
    /// Human-readable transfer speed.
    pub speed: String,
    /// Failure detail when `status` is `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether a published artifact exists for this task.
    pub has_file: bool,
    /// Size of the published artifact in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Completed-package listing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageInfo {
    /// Task identity.
    pub id: Uuid,
    /// Software descriptor.
    pub software: Software,
    /// Tenant identifier.
    pub account_hash: String,
    /// Artifact size in bytes.
    pub file_size: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Request body for creating a download task.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDownloadRequest {
    /// Software descriptor.
    pub software: Software,
    /// Tenant identifier.
    pub account_hash: String,
    /// Signed CDN URL for the encrypted package.
    #[serde(rename = "downloadURL")]
    pub download_url: String,
    /// SINF blobs to inject.
    pub sinfs: Vec<Sinf>,
    /// Base64-encoded XML metadata plist.
    #[serde(rename = "iTunesMetadata")]
    pub itunes_metadata: Option<String>,
}

/// Janitor tunables persisted in the task store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSettings {
    /// Maximum task age in days; `0` disables the age phase.
    pub auto_cleanup_days: u32,
    /// Storage cap in MiB; `0` disables the quota phase.
    pub auto_cleanup_max_mb: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn sample_software() -> Software {
        Software {
            id: 284_882_215,
            bundle_id: "com.example.social".into(),
            name: "Social".into(),
            version: "400.0".into(),
            price: Some(0.0),
            artist_name: "Example, Inc.".into(),
            seller_name: "Example, Inc.".into(),
            description: "Stay connected".into(),
            average_user_rating: 3.5,
            user_rating_count: 1_000_000,
            artwork_url: "https://example.com/icon.png".into(),
            screenshot_urls: vec!["https://example.com/ss1.png".into()],
            minimum_os_version: "16.0".into(),
            file_size_bytes: Some("200000000".into()),
            release_date: "2024-01-01T00:00:00Z".into(),
            release_notes: Some("Bug fixes".into()),
            formatted_price: Some("Free".into()),
            primary_genre_name: "Social Networking".into(),
        }
    }

    fn sample_request() -> CreateDownloadRequest {
        CreateDownloadRequest {
            software: sample_software(),
            account_hash: "abcdef1234567890".into(),
            download_url: "https://cdn.apple.com/file.ipa".into(),
            sinfs: vec![Sinf {
                id: 0,
                sinf: "c2VjcmV0".into(),
            }],
            itunes_metadata: Some("bWV0YWRhdGE=".into()),
        }
    }

    #[test]
    fn software_wire_format_keeps_historical_renames() -> Result<()> {
        let json = serde_json::to_value(sample_software())?;
        assert_eq!(json["bundleID"], "com.example.social");
        assert_eq!(json["artworkUrl"], "https://example.com/icon.png");
        assert_eq!(json["artistName"], "Example, Inc.");
        assert_eq!(json["primaryGenreName"], "Social Networking");
        Ok(())
    }

    #[test]
    fn software_optional_fields_are_omitted() -> Result<()> {
        let mut software = sample_software();
        software.price = None;
        software.file_size_bytes = None;
        software.release_notes = None;
        software.formatted_price = None;
        let json = serde_json::to_value(software)?;
        assert!(json.get("price").is_none());
        assert!(json.get("fileSizeBytes").is_none());
        assert!(json.get("releaseNotes").is_none());
        assert!(json.get("formattedPrice").is_none());
        Ok(())
    }

    #[test]
    fn task_status_round_trips_through_labels() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Downloading,
            TaskStatus::Paused,
            TaskStatus::Injecting,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("resumed"), None);
    }

    #[test]
    fn new_task_starts_pending_with_secrets() {
        let task = DownloadTask::new(sample_request());
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);
        assert_eq!(task.speed, "0 B/s");
        assert!(task.wants_injection());
        assert!(!task.download_url.is_empty());
    }

    #[test]
    fn clear_secrets_removes_everything_sensitive() {
        let mut task = DownloadTask::new(sample_request());
        task.clear_secrets();
        assert!(task.download_url.is_empty());
        assert!(task.sinfs.is_empty());
        assert!(task.itunes_metadata.is_none());
        assert!(!task.wants_injection());
    }

    #[test]
    fn sanitize_drops_secret_fields() -> Result<()> {
        let mut task = DownloadTask::new(sample_request());
        task.status = TaskStatus::Completed;
        task.progress = 100;

        let json = serde_json::to_value(task.sanitize(Some(1024)))?;
        assert!(json.get("downloadURL").is_none());
        assert!(json.get("downloadUrl").is_none());
        assert!(json.get("sinfs").is_none());
        assert!(json.get("iTunesMetadata").is_none());
        assert!(json.get("filePath").is_none());
        assert_eq!(json["hasFile"], true);
        assert_eq!(json["fileSize"], 1024);
        Ok(())
    }

    #[test]
    fn sanitize_without_artifact_reports_no_file() -> Result<()> {
        let task = DownloadTask::new(sample_request());
        let json = serde_json::to_value(task.sanitize(None))?;
        assert_eq!(json["hasFile"], false);
        assert!(json.get("fileSize").is_none());
        Ok(())
    }

    #[test]
    fn task_record_keeps_itunes_metadata_field_name() -> Result<()> {
        let task = DownloadTask::new(sample_request());
        let json = serde_json::to_value(task)?;
        assert!(json.get("iTunesMetadata").is_some());
        assert!(json.get("itunesMetadata").is_none());
        Ok(())
    }

    #[test]
    fn wants_injection_ignores_empty_metadata() {
        let mut request = sample_request();
        request.sinfs = Vec::new();
        request.itunes_metadata = Some(String::new());
        let task = DownloadTask::new(request);
        assert!(!task.wants_injection());
    }
}
