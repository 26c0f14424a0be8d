//! Digest helpers shared by every protocol component.
//!
//! All protocol digests are SHA-256 rendered as 64 lowercase hex characters.
//! Inputs are concatenated as UTF-8 text before hashing, so client and server
//! agree on every digest as long as they agree on the string being hashed.

use rand::RngCore;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Width of a hex-encoded SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

/// `previousHash` of the first link in every chain: 64 hex zeros.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Hashes UTF-8 text and returns the lowercase hex digest.
pub fn sha256_hex(input: &str) -> String {
    sha256_bytes_hex(input.as_bytes())
}

/// Hashes raw bytes and returns the lowercase hex digest.
pub fn sha256_bytes_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hash-based MAC: digest of `payload` followed by a shared `secret`.
///
/// This is the signature scheme used for manifests, access tokens and client
/// responses. It authenticates a closed client/server pair that shares the
/// secret; it is not verifiable by third parties.
pub fn keyed_digest(payload: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Returns `true` if `value` starts with at least `count` literal `'0'` characters.
pub fn has_leading_zeros(value: &str, count: u32) -> bool {
    let count = count as usize;
    value.len() >= count && value.bytes().take(count).all(|b| b == b'0')
}

/// Mints a fresh 128-bit random token rendered as hex.
pub fn random_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn genesis_is_full_width() {
        assert_eq!(GENESIS_HASH.len(), HASH_HEX_LEN);
        assert!(has_leading_zeros(GENESIS_HASH, HASH_HEX_LEN as u32));
    }

    #[test]
    fn leading_zero_predicate() {
        assert!(has_leading_zeros("000abc", 3));
        assert!(!has_leading_zeros("00a0bc", 3));
        assert!(has_leading_zeros("anything", 0));
        assert!(!has_leading_zeros("00", 3));
    }

    #[test]
    fn keyed_digest_depends_on_secret() {
        let a = keyed_digest("payload", "secret-a");
        let b = keyed_digest("payload", "secret-b");
        assert_ne!(a, b);
        assert_eq!(a, sha256_hex("payloadsecret-a"));
    }

    #[test]
    fn random_tokens_are_distinct() {
        let a = random_token();
        let b = random_token();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
