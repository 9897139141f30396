//! HMAC-signed session tokens.
//!
//! A token is `base64url(payload) + "." + base64url(mac)` where the payload
//! is a small JSON object `{"exp": <unixSeconds>}` and the MAC key is
//! derived from the stored password hash. Rotating the password therefore
//! invalidates every outstanding session.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::password::constant_time_eq;

/// Session lifetime: seven days.
pub const SESSION_TTL_SECS: u64 = 7 * 24 * 60 * 60;

const KEY_CONTEXT: &[u8] = b"pomar.session.v1";

#[derive(Debug, Serialize, Deserialize)]
struct TokenPayload {
    exp: u64,
}

fn session_key(password_hash: &str) -> [u8; 32] {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(password_hash.as_bytes()).expect("any key size works");
    mac.update(KEY_CONTEXT);
    mac.finalize().into_bytes().into()
}

fn sign(key: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("any key size works");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Issue a session token expiring [`SESSION_TTL_SECS`] after `now`.
#[must_use]
pub fn issue_session_token(password_hash: &str, now: u64) -> String {
    let payload = serde_json::to_vec(&TokenPayload {
        exp: now + SESSION_TTL_SECS,
    })
    .expect("payload serializes");
    let key = session_key(password_hash);
    let mac = sign(&key, &payload);
    format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(&payload),
        URL_SAFE_NO_PAD.encode(mac)
    )
}

/// Validate a session token against the current password hash and clock.
#[must_use]
pub fn validate_session_token(password_hash: &str, token: &str, now: u64) -> bool {
    let Some((payload_b64, mac_b64)) = token.split_once('.') else {
        return false;
    };
    let Ok(payload) = URL_SAFE_NO_PAD.decode(payload_b64) else {
        return false;
    };
    let Ok(presented_mac) = URL_SAFE_NO_PAD.decode(mac_b64) else {
        return false;
    };

    let key = session_key(password_hash);
    let expected_mac = sign(&key, &payload);
    if !constant_time_eq(&expected_mac, &presented_mac) {
        return false;
    }

    let Ok(parsed) = serde_json::from_slice::<TokenPayload>(&payload) else {
        return false;
    };
    parsed.exp > now
}
