//! Cleanup settings endpoint.

use std::sync::Arc;

use axum::{Json, extract::State, response::{IntoResponse, Response}};
use pomar_core::CleanupSettings;
use serde_json::json;

use crate::error::ApiError;
use crate::state::ApiState;

const MIB: f64 = 1024.0 * 1024.0;

/// `GET /api/settings` — tunables plus storage totals and build metadata.
/// Nothing from the request is ever reflected back.
pub(crate) async fn get_settings(State(state): State<Arc<ApiState>>) -> Result<Response, ApiError> {
    let settings = state.store.get_config().await?;
    let totals = state.store.storage_totals().await?;
    #[expect(
        clippy::cast_precision_loss,
        reason = "storage totals are informational"
    )]
    let total_size_mb = totals.total_bytes as f64 / MIB;
    Ok(Json(json!({
        "autoCleanupDays": settings.auto_cleanup_days,
        "autoCleanupMaxMB": settings.auto_cleanup_max_mb,
        "storage": {
            "totalSizeMB": total_size_mb,
            "objectCount": totals.object_count,
        },
        "build": {
            "commit": state.build.commit,
            "date": state.build.date,
        },
    }))
    .into_response())
}

/// `PUT /api/settings`
pub(crate) async fn put_settings(
    State(state): State<Arc<ApiState>>,
    Json(settings): Json<CleanupSettings>,
) -> Result<Response, ApiError> {
    state.store.set_config(settings).await?;
    let stored = state.store.get_config().await?;
    Ok(Json(json!({
        "autoCleanupDays": stored.auto_cleanup_days,
        "autoCleanupMaxMB": stored.auto_cleanup_max_mb,
    }))
    .into_response())
}
