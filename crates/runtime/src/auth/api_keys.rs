//! API key issuance
//!
//! Keys look like `dlk_<30 bytes of URL-safe entropy>`. The raw value is
//! returned exactly once; only the SHA-256 hex digest plus the display
//! prefix/last-4 are stored.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

pub const API_KEY_PREFIX: &str = "dlk_";

/// A freshly issued key with everything the create response and the row need.
#[derive(Debug, Clone)]
pub struct IssuedApiKey {
    pub raw_key: String,
    pub key_hash: String,
    pub key_prefix: String,
    pub key_last4: String,
}

pub fn issue_api_key() -> IssuedApiKey {
    let mut bytes = [0u8; 30];
    rand::thread_rng().fill_bytes(&mut bytes);
    let raw_key = format!("{API_KEY_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes));

    let key_hash = hex::encode(Sha256::digest(raw_key.as_bytes()));
    let key_prefix = raw_key.chars().take(12).collect();
    let key_last4 = raw_key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    IssuedApiKey {
        raw_key,
        key_hash,
        key_prefix,
        key_last4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_keys_have_expected_shape() {
        let key = issue_api_key();
        assert!(key.raw_key.starts_with(API_KEY_PREFIX));
        assert_eq!(key.key_prefix.len(), 12);
        assert_eq!(key.key_last4.len(), 4);
        assert!(key.raw_key.ends_with(&key.key_last4));
        assert!(key.raw_key.starts_with(&key.key_prefix));
        assert_eq!(key.key_hash.len(), 64);
    }

    #[test]
    fn issued_keys_are_unique() {
        let a = issue_api_key();
        let b = issue_api_key();
        assert_ne!(a.raw_key, b.raw_key);
        assert_ne!(a.key_hash, b.key_hash);
    }
}
