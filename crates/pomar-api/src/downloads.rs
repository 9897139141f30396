//! Download task routes.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use pomar_core::{CreateDownloadRequest, validate_account_hash};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::ApiState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountHashesQuery {
    #[serde(default)]
    pub(crate) account_hashes: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountHashQuery {
    #[serde(default)]
    pub(crate) account_hash: String,
}

pub(crate) fn split_hashes(raw: &str) -> Result<Vec<String>, ApiError> {
    let hashes: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|hash| !hash.is_empty())
        .map(ToString::to_string)
        .collect();
    if hashes.is_empty() || !hashes.iter().all(|hash| validate_account_hash(hash)) {
        return Err(ApiError::bad_request("invalid accountHashes"));
    }
    Ok(hashes)
}

pub(crate) fn require_hash(raw: &str) -> Result<&str, ApiError> {
    if validate_account_hash(raw) {
        Ok(raw)
    } else {
        Err(ApiError::bad_request("invalid accountHash"))
    }
}

/// `POST /api/downloads`
pub(crate) async fn create_download(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<CreateDownloadRequest>,
) -> Result<Response, ApiError> {
    let task = state.store.create_task(request).await?;
    Ok((StatusCode::CREATED, Json(task)).into_response())
}

/// `GET /api/downloads?accountHashes=a,b`
pub(crate) async fn list_downloads(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<AccountHashesQuery>,
) -> Result<Response, ApiError> {
    let hashes = split_hashes(&query.account_hashes)?;
    let tasks = state.store.list_tasks(hashes).await?;
    Ok(Json(tasks).into_response())
}

/// `GET /api/downloads/{id}?accountHash=...`
pub(crate) async fn get_download(
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
    Ok(Json(task).into_response())
}

/// `POST /api/downloads/{id}/pause?accountHash=...`
pub(crate) async fn pause_download(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<AccountHashQuery>,
) -> Result<Response, ApiError> {
    let hash = require_hash(&query.account_hash)?;
    let task = state
        .store
        .pause_task(id, hash)
        .await?
        .ok_or_else(|| ApiError::bad_request("task is not downloading"))?;
    Ok(Json(task).into_response())
}

/// `POST /api/downloads/{id}/resume?accountHash=...`
pub(crate) async fn resume_download(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<AccountHashQuery>,
) -> Result<Response, ApiError> {
    let hash = require_hash(&query.account_hash)?;
    let task = state
        .store
        .resume_task(id, hash)
        .await?
        .ok_or_else(|| ApiError::bad_request("task is not paused"))?;
    Ok(Json(task).into_response())
}

/// `DELETE /api/downloads/{id}?accountHash=...`
pub(crate) async fn delete_download(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<AccountHashQuery>,
) -> Result<Response, ApiError> {
    let hash = require_hash(&query.account_hash)?;
    if !state.store.delete_task(id, hash).await? {
        return Err(ApiError::not_found("task not found"));
    }
    Ok(Json(json!({ "success": true })).into_response())
}
