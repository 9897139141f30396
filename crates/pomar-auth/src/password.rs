//! PBKDF2-HMAC-SHA256 password hashing.
//!
//! Stored format: `base64url(salt) + "." + base64url(hash)` with a random
//! 16-byte salt, 100 000 iterations, and a 32-byte output. The format is
//! shared with existing deployments and must not drift.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;
const ITERATIONS: u32 = 100_000;

// Fixed key for the equalizing HMAC pass; not a secret, it only forces both
// sides of the comparison through the same pseudorandom function.
const COMPARE_KEY: &[u8] = b"pomar.password.compare.v1";

/// Hash a password for storage.
#[must_use]
pub fn hash_password(password: &str) -> String {
    let salt: [u8; SALT_LEN] = rand::random();
    let mut hash = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, ITERATIONS, &mut hash);
    format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(salt),
        URL_SAFE_NO_PAD.encode(hash)
    )
}

/// Verify a password against a stored hash string.
///
/// Both the recomputed and the stored digest are HMAC-ed with a fixed key
/// and the results compared byte-for-byte in constant time, so neither
/// length nor prefix information leaks through timing.
#[must_use]
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt_b64, hash_b64)) = stored.split_once('.') else {
        return false;
    };
    let Ok(salt) = URL_SAFE_NO_PAD.decode(salt_b64) else {
        return false;
    };
    let Ok(expected) = URL_SAFE_NO_PAD.decode(hash_b64) else {
        return false;
    };

    let mut computed = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, ITERATIONS, &mut computed);

    constant_time_eq(&equalize(&computed), &equalize(&expected))
}

fn equalize(data: &[u8]) -> [u8; HASH_LEN] {
    let mut mac = Hmac::<Sha256>::new_from_slice(COMPARE_KEY).expect("hmac accepts any key size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Bytewise constant-time equality.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_format_has_two_base64url_fields() {
        let stored = hash_password("hunter2");
        let (salt, hash) = stored.split_once('.').unwrap();
        assert_eq!(URL_SAFE_NO_PAD.decode(salt).unwrap().len(), SALT_LEN);
        assert_eq!(URL_SAFE_NO_PAD.decode(hash).unwrap().len(), HASH_LEN);
    }

    #[test]
    fn verify_accepts_correct_password() {
        let stored = hash_password("correct horse battery staple");
        assert!(verify_password("correct horse battery staple", &stored));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let stored = hash_password("password-one");
        assert!(!verify_password("password-two", &stored));
        assert!(!verify_password("", &stored));
    }

    #[test]
    fn salts_differ_between_hashes() {
        let a = hash_password("same");
        let b = hash_password("same");
        assert_ne!(a, b);
        assert!(verify_password("same", &a));
        assert!(verify_password("same", &b));
    }

    #[test]
    fn malformed_stored_hashes_never_verify() {
        for stored in ["", "nodot", "bad!.base64", "a.b.c", "%%%.%%%"] {
            assert!(!verify_password("anything", stored), "{stored}");
        }
    }

    #[test]
    fn constant_time_eq_checks_length_and_content() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }
}
