//! Completed-package routes.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use pomar_core::{TaskStatus, sanitize_filename};
use uuid::Uuid;

use crate::downloads::{AccountHashQuery, AccountHashesQuery, require_hash, split_hashes};
use crate::error::ApiError;
use crate::state::ApiState;
use crate::stream::blob_body;

/// `GET /api/packages?accountHashes=a,b`
pub(crate) async fn list_packages(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<AccountHashesQuery>,
) -> Result<Response, ApiError> {
    let hashes = split_hashes(&query.account_hashes)?;
    let packages = state.store.list_packages(hashes).await?;
    Ok(Json(packages).into_response())
}

/// `GET /api/packages/{id}/file?accountHash=...`
///
/// Redirects to the public CDN domain when one is configured; otherwise
/// streams the artifact with an attachment disposition.
pub(crate) async fn package_file(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<AccountHashQuery>,
) -> Result<Response, ApiError> {
    let hash = require_hash(&query.account_hash)?;
    let task = state
        .store
        .get_task(id, hash)
        .await?
        .ok_or_else(|| ApiError::not_found("task not found"))?;
    if task.status != TaskStatus::Completed {
        return Err(ApiError::not_found("package not ready"));
    }
    let key = state
        .store
        .artifact_key_public(id)
        .await?
        .ok_or_else(|| ApiError::not_found("artifact missing"))?;

    if let Some(domain) = &state.cdn_domain {
        return Ok((
            StatusCode::FOUND,
            [(header::LOCATION, format!("https://{domain}/{key}"))],
        )
            .into_response());
    }

    let meta = state
        .blob
        .head(&key)
        .await
        .map_err(|_| ApiError::internal("artifact unreadable"))?
        .ok_or_else(|| ApiError::not_found("artifact missing"))?;

    let filename = format!(
        "{}_{}.ipa",
        sanitize_filename(&task.software.name),
        sanitize_filename(&task.software.version)
    );
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, meta.size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        blob_body(Arc::clone(&state.blob), key, meta.size),
    )
        .into_response())
}
