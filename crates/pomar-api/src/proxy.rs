//! Bag and search proxies.
//!
//! These merely forward Apple-served documents with size caps and never
//! carry credentials; the purchase flow itself rides the tunnel.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use pomar_core::Software;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::error::ApiError;
use crate::state::ApiState;

/// User agent Apple expects on bag requests.
const BAG_USER_AGENT: &str =
    "Configurator/2.17 (Macintosh; OS X 15.2; 24C5089c) AppleWebKit/0620.1.16.11.6";
const BAG_TIMEOUT: Duration = Duration::from_secs(15);
const BAG_MAX_BYTES: usize = 1024 * 1024;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(15);
const SEARCH_MAX_BYTES: usize = 5 * 1024 * 1024;
const SEARCH_MAX_LIMIT: u32 = 50;

#[derive(Deserialize)]
pub(crate) struct BagQuery {
    #[serde(default)]
    guid: String,
}

#[derive(Deserialize)]
pub(crate) struct SearchQuery {
    #[serde(default)]
    term: String,
    limit: Option<u32>,
    country: Option<String>,
}

fn is_hex(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// `GET /api/bag?guid=<hex>` — fetches the service endpoint catalog and
/// returns just the plist block.
pub(crate) async fn bag_proxy(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<BagQuery>,
) -> Result<Response, ApiError> {
    if !is_hex(&query.guid) {
        return Err(ApiError::bad_request("guid must be a hex string"));
    }

    let response = state
        .http
        .get("https://init.itunes.apple.com/bag.xml")
        .query(&[("guid", query.guid.as_str())])
        .header(header::USER_AGENT.as_str(), BAG_USER_AGENT)
        .timeout(BAG_TIMEOUT)
        .send()
        .await
        .map_err(|err| {
            warn!(error = %err, "bag fetch failed");
            ApiError::bad_gateway("bag fetch failed")
        })?;
    if !response.status().is_success() {
        return Err(ApiError::bad_gateway("bag fetch failed"));
    }
    if response
        .content_length()
        .is_some_and(|len| len > BAG_MAX_BYTES as u64)
    {
        return Err(ApiError::too_large("bag response too large"));
    }

    let body = response
        .bytes()
        .await
        .map_err(|_| ApiError::bad_gateway("bag fetch failed"))?;
    if body.len() > BAG_MAX_BYTES {
        return Err(ApiError::too_large("bag response too large"));
    }
    let text = String::from_utf8_lossy(&body);
    let plist = extract_plist(&text).ok_or_else(|| ApiError::bad_gateway("bag had no plist"))?;

    Ok((
        [(header::CONTENT_TYPE, "application/xml")],
        plist.to_string(),
    )
        .into_response())
}

/// `GET /api/search?term=...&limit=...` — iTunes software search mapped
/// into the software descriptor shape.
pub(crate) async fn search_proxy(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Response, ApiError> {
    if query.term.trim().is_empty() {
        return Err(ApiError::bad_request("term is required"));
    }
    let limit = query.limit.unwrap_or(20).clamp(1, SEARCH_MAX_LIMIT);
    let country = query.country.unwrap_or_else(|| "US".to_string());

    let response = state
        .http
        .get("https://itunes.apple.com/search")
        .query(&[
            ("media", "software"),
            ("entity", "software"),
            ("term", query.term.as_str()),
            ("limit", limit.to_string().as_str()),
            ("country", country.as_str()),
        ])
        .timeout(SEARCH_TIMEOUT)
        .send()
        .await
        .map_err(|err| {
            warn!(error = %err, "search fetch failed");
            ApiError::bad_gateway("search fetch failed")
        })?;
    if !response.status().is_success() {
        return Err(ApiError::bad_gateway("search fetch failed"));
    }
    if response
        .content_length()
        .is_some_and(|len| len > SEARCH_MAX_BYTES as u64)
    {
        return Err(ApiError::too_large("search response too large"));
    }

    let body = response
        .bytes()
        .await
        .map_err(|_| ApiError::bad_gateway("search fetch failed"))?;
    if body.len() > SEARCH_MAX_BYTES {
        return Err(ApiError::too_large("search response too large"));
    }
    let parsed: Value = serde_json::from_slice(&body)
        .map_err(|_| ApiError::bad_gateway("search result unparsable"))?;

    let results: Vec<Software> = parsed
        .get("results")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(map_software).collect())
        .unwrap_or_default();

    Ok(Json(json!({ "count": results.len(), "results": results })).into_response())
}

/// Extract the `<plist>...</plist>` block from a bag document.
fn extract_plist(body: &str) -> Option<&str> {
    let start = body.find("<plist")?;
    let end = body.find("</plist>")?;
    Some(&body[start..end + "</plist>".len()])
}

fn str_or_default(item: &Value, key: &str) -> String {
    item.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn opt_str(item: &Value, key: &str) -> Option<String> {
    item.get(key).and_then(Value::as_str).map(String::from)
}

/// Map one iTunes search result into the software descriptor shape.
fn map_software(item: &Value) -> Option<Software> {
    Some(Software {
        id: item.get("trackId")?.as_i64()?,
        bundle_id: item.get("bundleId")?.as_str()?.to_string(),
        name: item.get("trackName")?.as_str()?.to_string(),
        version: str_or_default(item, "version"),
        price: item.get("price").and_then(Value::as_f64),
        artist_name: str_or_default(item, "artistName"),
        seller_name: str_or_default(item, "sellerName"),
        description: str_or_default(item, "description"),
        average_user_rating: item
            .get("averageUserRating")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        user_rating_count: item
            .get("userRatingCount")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        artwork_url: str_or_default(item, "artworkUrl512"),
        screenshot_urls: item
            .get("screenshotUrls")
            .and_then(Value::as_array)
            .map(|urls| {
                urls.iter()
                    .filter_map(|url| url.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default(),
        minimum_os_version: str_or_default(item, "minimumOsVersion"),
        file_size_bytes: opt_str(item, "fileSizeBytes"),
        release_date: item
            .get("currentVersionReleaseDate")
            .or_else(|| item.get("releaseDate"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        release_notes: opt_str(item, "releaseNotes"),
        formatted_price: opt_str(item, "formattedPrice"),
        primary_genre_name: str_or_default(item, "primaryGenreName"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_must_be_hex() {
        assert!(is_hex("abcdef0123"));
        assert!(is_hex("ABCDEF"));
        assert!(!is_hex(""));
        assert!(!is_hex("xyz"));
        assert!(!is_hex("ab-cd"));
    }

    #[test]
    fn plist_block_is_extracted() {
        let body = "junk<plist version=\"1.0\"><dict/></plist>trailer";
        assert_eq!(
            extract_plist(body).unwrap(),
            "<plist version=\"1.0\"><dict/></plist>"
        );
        assert!(extract_plist("no plist here").is_none());
    }

    #[test]
    fn search_items_map_into_software() {
        let item = json!({
            "trackId": 42,
            "bundleId": "com.x.y",
            "trackName": "Demo",
            "version": "1.0",
            "artistName": "Dev",
            "averageUserRating": 4.5,
            "screenshotUrls": ["https://example.com/1.png"],
            "fileSizeBytes": "12345",
            "currentVersionReleaseDate": "2024-01-01"
        });
        let software = map_software(&item).unwrap();
        assert_eq!(software.id, 42);
        assert_eq!(software.bundle_id, "com.x.y");
        assert_eq!(software.release_date, "2024-01-01");
        assert_eq!(software.file_size_bytes.as_deref(), Some("12345"));

        // Items without a bundle id are dropped.
        assert!(map_software(&json!({"trackId": 1})).is_none());
    }
}
