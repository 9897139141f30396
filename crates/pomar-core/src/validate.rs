//! Request validation and path/filename hygiene.
//!
//! Every value that ends up in a blob-store key or an HTTP header passes
//! through here first.

use thiserror::Error;

use crate::model::CreateDownloadRequest;

/// Validation failure surfaced at the RPC boundary, before any side effects.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A field failed syntactic validation.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Field name as it appears on the wire.
        field: &'static str,
        /// Human-readable reason.
        reason: &'static str,
    },
}

impl ValidationError {
    const fn field(field: &'static str, reason: &'static str) -> Self {
        Self::InvalidField { field, reason }
    }
}

fn is_safe_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'
}

/// Validate a value used as a single blob-store path segment.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidField`] when the value is empty, is a
/// dot segment, or contains characters outside `[A-Za-z0-9._-]`.
pub fn validate_path_segment(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.is_empty() || !value.chars().all(is_safe_segment_char) {
        return Err(ValidationError::field(
            field,
            "must contain only alphanumeric characters, dots, dashes, or underscores",
        ));
    }
    if value == "." || value == ".." {
        return Err(ValidationError::field(field, "must not be a dot segment"));
    }
    Ok(())
}

/// Replace unsafe characters in a path segment with underscores.
///
/// # Errors
///
/// Returns an error when nothing safe remains after replacement.
pub fn sanitize_path_segment(value: &str) -> Result<String, ValidationError> {
    let cleaned: String = value
        .chars()
        .map(|c| if is_safe_segment_char(c) { c } else { '_' })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return Err(ValidationError::field("segment", "empty after sanitizing"));
    }
    Ok(cleaned)
}

/// Validate a tenant identifier: at least eight characters from the safe
/// segment alphabet.
#[must_use]
pub fn validate_account_hash(hash: &str) -> bool {
    hash.len() >= 8 && hash.chars().all(is_safe_segment_char)
}

fn is_ip_literal(host: &str) -> bool {
    host.parse::<std::net::Ipv4Addr>().is_ok()
        || host.parse::<std::net::Ipv6Addr>().is_ok()
        || host.starts_with('[')
}

/// Validate a CDN download URL: HTTPS, hostname suffix `.apple.com`, and
/// never a literal IP address.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidField`] naming the violated rule.
pub fn validate_download_url(raw: &str) -> Result<(), ValidationError> {
    const FIELD: &str = "downloadURL";
    let parsed =
        url::Url::parse(raw).map_err(|_| ValidationError::field(FIELD, "not a parseable URL"))?;

    if parsed.scheme() != "https" {
        return Err(ValidationError::field(FIELD, "must use HTTPS"));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| ValidationError::field(FIELD, "missing host"))?;

    // IP literals are rejected before the suffix check so the error names
    // the actual rule violated.
    if is_ip_literal(host) {
        return Err(ValidationError::field(FIELD, "must not use an IP address"));
    }

    if !host.to_ascii_lowercase().ends_with(".apple.com") {
        return Err(ValidationError::field(
            FIELD,
            "must be an Apple CDN host (*.apple.com)",
        ));
    }

    Ok(())
}

/// Validate a create-download request body.
///
/// # Errors
///
/// Returns the first field-level failure found.
pub fn validate_create_request(request: &CreateDownloadRequest) -> Result<(), ValidationError> {
    if !validate_account_hash(&request.account_hash) {
        return Err(ValidationError::field(
            "accountHash",
            "must be at least 8 safe characters",
        ));
    }
    validate_download_url(&request.download_url)?;
    validate_path_segment(&request.software.bundle_id, "bundleID")?;
    validate_path_segment(&request.software.version, "version")?;
    Ok(())
}

/// Sanitize a filename for a `Content-Disposition` header: printable ASCII,
/// no quotes or backslashes, capped at 200 characters.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|&c| c.is_ascii_graphic() || c == ' ')
        .filter(|&c| c != '"' && c != '\\')
        .take(200)
        .collect()
}

/// Format a transfer speed in human-readable form.
#[must_use]
pub fn format_speed(bytes_per_sec: f64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    if bytes_per_sec < KIB {
        #[expect(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "value is below 1024 and non-negative"
        )]
        let rounded = bytes_per_sec.round() as u64;
        format!("{rounded} B/s")
    } else if bytes_per_sec < MIB {
        format!("{:.1} KB/s", bytes_per_sec / KIB)
    } else {
        format!("{:.1} MB/s", bytes_per_sec / MIB)
    }
}
