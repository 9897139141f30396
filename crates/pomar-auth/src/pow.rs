//! Browser proof-of-work gate.
//!
//! Challenges are `"<unixSeconds>:<uuid>:<base64urlHmac>"` signed with a
//! process-ephemeral key, so a restart invalidates everything outstanding.
//! A nonce satisfies difficulty `D` when `SHA-256(challenge + nonce)` has
//! `D` leading zero bits. Each challenge is one-shot within its 60-second
//! TTL; replays are tracked per process.

use std::collections::HashMap;
use std::sync::Mutex;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::password::constant_time_eq;

/// Challenge TTL in seconds.
const CHALLENGE_TTL_SECS: u64 = 60;

/// Replay-map size that triggers pruning of expired entries.
const REPLAY_PRUNE_THRESHOLD: usize = 4096;

/// Default difficulty in leading zero bits.
pub const DEFAULT_POW_DIFFICULTY: u8 = 18;

const MIN_DIFFICULTY: u8 = 16;
const MAX_DIFFICULTY: u8 = 24;

/// Clamp a configured difficulty into the supported `[16, 24]` window.
#[must_use]
pub const fn clamp_difficulty(value: u8) -> u8 {
    if value < MIN_DIFFICULTY {
        MIN_DIFFICULTY
    } else if value > MAX_DIFFICULTY {
        MAX_DIFFICULTY
    } else {
        value
    }
}

/// Proof-of-work verification failure; every variant maps to a 400.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PowError {
    /// Challenge string did not have the expected three fields.
    #[error("malformed challenge")]
    Malformed,
    /// Challenge signature did not verify; likely from a previous process.
    #[error("unknown or foreign challenge")]
    BadSignature,
    /// Challenge is older than its TTL.
    #[error("challenge expired")]
    Expired,
    /// Challenge was already redeemed once.
    #[error("challenge already used")]
    Replayed,
    /// The nonce does not reach the required difficulty.
    #[error("nonce does not satisfy difficulty")]
    Insufficient,
}

/// Issues and verifies proof-of-work challenges.
pub struct PowGate {
    key: [u8; 32],
    difficulty: u8,
    used: Mutex<HashMap<String, u64>>,
}

impl PowGate {
    /// Create a gate with a fresh process-ephemeral signing key.
    #[must_use]
    pub fn new(difficulty: u8) -> Self {
        Self {
            key: rand::random(),
            difficulty: clamp_difficulty(difficulty),
            used: Mutex::new(HashMap::new()),
        }
    }

    /// Difficulty in leading zero bits.
    #[must_use]
    pub const fn difficulty(&self) -> u8 {
        self.difficulty
    }

    /// Issue a fresh challenge at `now` unix seconds.
    #[must_use]
    pub fn issue(&self, now: u64) -> String {
        let base = format!("{now}:{}", Uuid::new_v4());
        let mac = self.sign(base.as_bytes());
        format!("{base}:{}", URL_SAFE_NO_PAD.encode(mac))
    }

    /// Verify a `(challenge, nonce)` pair at `now` and consume the
    /// challenge on success.
    ///
    /// # Errors
    ///
    /// Returns the specific [`PowError`]; a challenge that fails the nonce
    /// check is *not* consumed, so the client may retry with more work.
    pub fn verify(&self, challenge: &str, nonce: &str, now: u64) -> Result<(), PowError> {
        let mut fields = challenge.splitn(3, ':');
        let (Some(ts), Some(id), Some(sig)) = (fields.next(), fields.next(), fields.next()) else {
            return Err(PowError::Malformed);
        };
        let issued: u64 = ts.parse().map_err(|_| PowError::Malformed)?;
        Uuid::parse_str(id).map_err(|_| PowError::Malformed)?;

        let expected = self.sign(format!("{ts}:{id}").as_bytes());
        let presented = URL_SAFE_NO_PAD
            .decode(sig)
            .map_err(|_| PowError::Malformed)?;
        if !constant_time_eq(&expected, &presented) {
            return Err(PowError::BadSignature);
        }

        if now < issued || now - issued > CHALLENGE_TTL_SECS {
            return Err(PowError::Expired);
        }

        {
            let used = self.used.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if used.contains_key(challenge) {
                return Err(PowError::Replayed);
            }
        }

        let mut hasher = Sha256::new();
        hasher.update(challenge.as_bytes());
        hasher.update(nonce.as_bytes());
        let digest = hasher.finalize();
        if leading_zero_bits(&digest) < u32::from(self.difficulty) {
            return Err(PowError::Insufficient);
        }

        let mut used = self.used.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if used.len() >= REPLAY_PRUNE_THRESHOLD {
            let before = used.len();
            used.retain(|_, &mut expiry| expiry > now);
            debug!(pruned = before - used.len(), "pruned expired pow challenges");
        }
        if used
            .insert(challenge.to_string(), issued + CHALLENGE_TTL_SECS)
            .is_some()
        {
            return Err(PowError::Replayed);
        }
        Ok(())
    }

    fn sign(&self, data: &[u8]) -> [u8; 32] {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.key).expect("any key size works");
        mac.update(data);
        mac.finalize().into_bytes().into()
    }
}

fn leading_zero_bits(digest: &[u8]) -> u32 {
    let mut bits = 0;
    for &byte in digest {
        if byte == 0 {
            bits += 8;
        } else {
            bits += byte.leading_zeros();
            break;
        }
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Brute-force a nonce for tests; gates under test use difficulty 16,
    /// which needs ~65k hashes on average.
    fn solve(challenge: &str) -> String {
        for candidate in 0u64.. {
            let nonce = candidate.to_string();
            let mut hasher = Sha256::new();
            hasher.update(challenge.as_bytes());
            hasher.update(nonce.as_bytes());
            if leading_zero_bits(&hasher.finalize()) >= 16 {
                return nonce;
            }
        }
        unreachable!()
    }

    #[test]
    fn difficulty_is_clamped() {
        assert_eq!(clamp_difficulty(0), 16);
        assert_eq!(clamp_difficulty(18), 18);
        assert_eq!(clamp_difficulty(99), 24);
        assert_eq!(PowGate::new(2).difficulty(), 16);
    }

    #[test]
    fn challenge_has_three_fields_and_parses() {
        let gate = PowGate::new(16);
        let challenge = gate.issue(1_000);
        let fields: Vec<&str> = challenge.splitn(3, ':').collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0], "1000");
        assert!(Uuid::parse_str(fields[1]).is_ok());
    }

    #[test]
    fn solved_challenge_verifies_once_then_replays() {
        let gate = PowGate::new(16);
        let challenge = gate.issue(1_000);
        let nonce = solve(&challenge);

        assert_eq!(gate.verify(&challenge, &nonce, 1_010), Ok(()));
        assert_eq!(
            gate.verify(&challenge, &nonce, 1_020),
            Err(PowError::Replayed)
        );
    }

    #[test]
    fn wrong_nonce_is_insufficient_and_not_consumed() {
        let gate = PowGate::new(16);
        let challenge = gate.issue(1_000);
        // An unsolved nonce virtually never reaches 16 zero bits; pick one
        // that provably fails for this challenge.
        let mut bad_nonce = None;
        for candidate in 0u64..64 {
            let nonce = candidate.to_string();
            let mut hasher = Sha256::new();
            hasher.update(challenge.as_bytes());
            hasher.update(nonce.as_bytes());
            if leading_zero_bits(&hasher.finalize()) < 16 {
                bad_nonce = Some(nonce);
                break;
            }
        }
        let bad_nonce = bad_nonce.expect("some candidate fails");
        assert_eq!(
            gate.verify(&challenge, &bad_nonce, 1_010),
            Err(PowError::Insufficient)
        );

        // The challenge is still redeemable afterwards.
        let nonce = solve(&challenge);
        assert_eq!(gate.verify(&challenge, &nonce, 1_010), Ok(()));
    }

    #[test]
    fn expired_and_future_challenges_are_rejected() {
        let gate = PowGate::new(16);
        let challenge = gate.issue(1_000);
        let nonce = solve(&challenge);
        assert_eq!(
            gate.verify(&challenge, &nonce, 1_061),
            Err(PowError::Expired)
        );
        assert_eq!(gate.verify(&challenge, &nonce, 999), Err(PowError::Expired));
    }

    #[test]
    fn foreign_signatures_are_rejected() {
        let issuing = PowGate::new(16);
        let verifying = PowGate::new(16);
        let challenge = issuing.issue(1_000);
        assert_eq!(
            verifying.verify(&challenge, "0", 1_010),
            Err(PowError::BadSignature)
        );
    }

    #[test]
    fn malformed_challenges_are_rejected() {
        let gate = PowGate::new(16);
        for challenge in ["", "123", "123:nope", "abc:def:ghi", "123:not-a-uuid:c2ln"] {
            assert_eq!(
                gate.verify(challenge, "0", 1_000),
                Err(PowError::Malformed),
                "{challenge}"
            );
        }
    }
}
