//! Session authentication: cookie plumbing, the PoW-gated setup/login
//! endpoints, and the middleware protecting tenant routes.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use pomar_auth::{
    SESSION_TTL_SECS, hash_password, issue_session_token, validate_session_token, verify_password,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::state::ApiState;

const SESSION_COOKIE: &str = "pomar_session";

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

fn is_local_host(host: &str) -> bool {
    host == "localhost" || host.starts_with("localhost:")
}

fn request_host(headers: &HeaderMap) -> String {
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Build the session `Set-Cookie` value. `Secure` and `SameSite=Strict`
/// are relaxed only for a literal localhost host.
fn session_cookie(token: &str, host: &str) -> String {
    if is_local_host(host) {
        format!("{SESSION_COOKIE}={token}; HttpOnly; Path=/; Max-Age={SESSION_TTL_SECS}; SameSite=Lax")
    } else {
        format!(
            "{SESSION_COOKIE}={token}; HttpOnly; Secure; Path=/; Max-Age={SESSION_TTL_SECS}; SameSite=Strict"
        )
    }
}

fn clear_cookie(host: &str) -> String {
    if is_local_host(host) {
        format!("{SESSION_COOKIE}=; HttpOnly; Path=/; Max-Age=0; SameSite=Lax")
    } else {
        format!("{SESSION_COOKIE}=; HttpOnly; Secure; Path=/; Max-Age=0; SameSite=Strict")
    }
}

pub(crate) fn extract_session(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

async fn session_is_valid(state: &ApiState, headers: &HeaderMap) -> Result<bool, ApiError> {
    let Some(hash) = state.store.get_password_hash().await? else {
        return Ok(false);
    };
    let Some(token) = extract_session(headers) else {
        return Ok(false);
    };
    Ok(validate_session_token(&hash, &token, unix_now()))
}

/// Middleware guarding the tunnel and the tenant-scoped API routes.
pub(crate) async fn require_session(
    State(state): State<Arc<ApiState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if !session_is_valid(&state, req.headers()).await? {
        return Err(ApiError::unauthorized("authentication required"));
    }
    Ok(next.run(req).await)
}

fn with_session_cookie(response: Response, token: &str, host: &str) -> Response {
    let mut response = response;
    if let Ok(value) = HeaderValue::from_str(&session_cookie(token, host)) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SetupBody {
    password: String,
    challenge: String,
    nonce: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoginBody {
    password: String,
    challenge: String,
    nonce: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChangePasswordBody {
    current_password: String,
    new_password: String,
    challenge: String,
    nonce: String,
}

/// `GET /api/auth/status`
pub(crate) async fn auth_status(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let setup = state.store.get_password_hash().await?.is_some();
    let authenticated = session_is_valid(&state, &headers).await?;
    Ok(Json(json!({
        "required": true,
        "setup": setup,
        "authenticated": authenticated,
    }))
    .into_response())
}

/// `GET /api/auth/challenge`
pub(crate) async fn auth_challenge(State(state): State<Arc<ApiState>>) -> Response {
    let challenge = state.pow.issue(unix_now());
    Json(json!({
        "challenge": challenge,
        "difficulty": state.pow.difficulty(),
    }))
    .into_response()
}

fn check_pow(state: &ApiState, challenge: &str, nonce: &str) -> Result<(), ApiError> {
    state.pow.verify(challenge, nonce, unix_now()).map_err(|err| {
        warn!(error = %err, "proof-of-work rejected");
        ApiError::bad_request(format!("proof of work rejected: {err}"))
    })
}

/// `POST /api/auth/setup` — first-time password setup; a second call is a
/// 400 regardless of the password presented.
pub(crate) async fn auth_setup(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<SetupBody>,
) -> Result<Response, ApiError> {
    check_pow(&state, &body.challenge, &body.nonce)?;
    if body.password.is_empty() {
        return Err(ApiError::bad_request("password must not be empty"));
    }

    let hash = hash_password(&body.password);
    if !state.store.set_password_hash_if_absent(hash.clone()).await? {
        return Err(ApiError::bad_request("setup already completed"));
    }
    info!("initial password configured");

    let token = issue_session_token(&hash, unix_now());
    let response = (StatusCode::OK, Json(json!({ "success": true }))).into_response();
    Ok(with_session_cookie(response, &token, &request_host(&headers)))
}

/// `POST /api/auth/login`
pub(crate) async fn auth_login(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<LoginBody>,
) -> Result<Response, ApiError> {
    check_pow(&state, &body.challenge, &body.nonce)?;
    let Some(hash) = state.store.get_password_hash().await? else {
        return Err(ApiError::bad_request("setup required"));
    };
    if !verify_password(&body.password, &hash) {
        return Err(ApiError::unauthorized("invalid password"));
    }

    let token = issue_session_token(&hash, unix_now());
    let response = (StatusCode::OK, Json(json!({ "success": true }))).into_response();
    Ok(with_session_cookie(response, &token, &request_host(&headers)))
}

/// `POST /api/auth/logout`
pub(crate) async fn auth_logout(headers: HeaderMap) -> Response {
    let mut response = Json(json!({ "success": true })).into_response();
    if let Ok(value) = HeaderValue::from_str(&clear_cookie(&request_host(&headers))) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

/// `POST /api/auth/change-password` — rotates the hash, which invalidates
/// every outstanding session; a fresh cookie is issued for this one.
pub(crate) async fn auth_change_password(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<ChangePasswordBody>,
) -> Result<Response, ApiError> {
    check_pow(&state, &body.challenge, &body.nonce)?;
    let Some(hash) = state.store.get_password_hash().await? else {
        return Err(ApiError::bad_request("setup required"));
    };
    if !verify_password(&body.current_password, &hash) {
        return Err(ApiError::unauthorized("invalid password"));
    }
    if body.new_password.is_empty() {
        return Err(ApiError::bad_request("password must not be empty"));
    }

    let new_hash = hash_password(&body.new_password);
    state.store.set_password_hash(new_hash.clone()).await?;
    info!("password rotated");

    let token = issue_session_token(&new_hash, unix_now());
    let response = (StatusCode::OK, Json(json!({ "success": true }))).into_response();
    Ok(with_session_cookie(response, &token, &request_host(&headers)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_flags_depend_on_host() {
        let public = session_cookie("tok", "pomar.example.com");
        assert!(public.contains("Secure"));
        assert!(public.contains("SameSite=Strict"));
        assert!(public.contains("HttpOnly"));

        let local = session_cookie("tok", "localhost:8080");
        assert!(!local.contains("Secure"));
        assert!(local.contains("SameSite=Lax"));
        assert!(local.contains("HttpOnly"));
    }

    #[test]
    fn session_extraction_parses_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("other=1; pomar_session=abc.def; trailing=2"),
        );
        assert_eq!(extract_session(&headers).as_deref(), Some("abc.def"));

        headers.insert(header::COOKIE, HeaderValue::from_static("other=1"));
        assert!(extract_session(&headers).is_none());
    }
}
