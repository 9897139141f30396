//! OTA install routes, public by unguessable task UUID.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use pomar_core::Software;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::ApiState;
use crate::stream::blob_body;

/// Minimal 1x1 white PNG served as the install display image.
const WHITE_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x02, 0x00, 0x00, 0x00, 0x90,
    0x77, 0x53, 0xde, 0x00, 0x00, 0x00, 0x0c, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0xf8,
    0xff, 0xff, 0x3f, 0x00, 0x05, 0xfe, 0x02, 0xfe, 0xa7, 0x35, 0x81, 0x84, 0x00, 0x00, 0x00,
    0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Build the itms-services installation manifest plist.
fn build_manifest(software: &Software, payload_url: &str, image_url: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>items</key>
    <array>
        <dict>
            <key>assets</key>
            <array>
                <dict>
                    <key>kind</key>
                    <string>software-package</string>
                    <key>url</key>
                    <string>{payload}</string>
                </dict>
                <dict>
                    <key>kind</key>
                    <string>display-image</string>
                    <key>url</key>
                    <string>{image}</string>
                </dict>
                <dict>
                    <key>kind</key>
                    <string>full-size-image</string>
                    <key>url</key>
                    <string>{image}</string>
                </dict>
            </array>
            <key>metadata</key>
            <dict>
                <key>bundle-identifier</key>
                <string>{bundle}</string>
                <key>bundle-version</key>
                <string>{version}</string>
                <key>kind</key>
                <string>software</string>
                <key>title</key>
                <string>{title}</string>
            </dict>
        </dict>
    </array>
</dict>
</plist>"#,
        payload = escape_xml(payload_url),
        image = escape_xml(image_url),
        bundle = escape_xml(&software.bundle_id),
        version = escape_xml(&software.version),
        title = escape_xml(&software.name),
    )
}

fn external_base(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    // Devices require HTTPS for itms-services; plain HTTP only makes sense
    // against a local instance.
    let scheme = if host.starts_with("localhost") || host.starts_with("127.0.0.1") {
        "http"
    } else {
        "https"
    };
    format!("{scheme}://{host}")
}

/// `GET /api/install/{id}/manifest.plist`
pub(crate) async fn install_manifest(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let task = state
        .store
        .get_task_public(id)
        .await?
        .filter(|task| task.has_file)
        .ok_or_else(|| ApiError::not_found("package not found"))?;

    let base = external_base(&headers);
    let manifest = build_manifest(
        &task.software,
        &format!("{base}/api/install/{id}/payload.ipa"),
        &format!("{base}/api/install/{id}/display-image.png"),
    );
    Ok((
        [(header::CONTENT_TYPE, "application/xml")],
        manifest,
    )
        .into_response())
}

/// `GET /api/install/{id}/payload.ipa`
pub(crate) async fn install_payload(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let key = state
        .store
        .artifact_key_public(id)
        .await?
        .ok_or_else(|| ApiError::not_found("package not found"))?;

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
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, meta.size.to_string()),
        ],
        blob_body(Arc::clone(&state.blob), key, meta.size),
    )
        .into_response())
}

/// `GET /api/install/{id}/display-image.png`
pub(crate) async fn display_image() -> Response {
    ([(header::CONTENT_TYPE, "image/png")], WHITE_PNG).into_response()
}
