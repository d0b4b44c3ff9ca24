//! Secure random token generation.

use ring::rand::{SecureRandom, SystemRandom};

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Length of the random part of an API key (after the `zrp_` prefix).
pub const API_KEY_RANDOM_LEN: usize = 30;

/// Session tokens are plain random strings (stored as-is, server side only).
pub const SESSION_TOKEN_LEN: usize = 40;

/// Characters of the full key shown as its human-visible prefix.
pub const API_KEY_PREFIX_LEN: usize = 12;

/// Random alphanumeric string of the given length.
pub fn random_token(len: usize) -> String {
    let rng = SystemRandom::new();
    let mut bytes = vec![0u8; len];
    // SystemRandom only fails when the OS RNG is unavailable.
    rng.fill(&mut bytes).expect("system RNG unavailable");
    bytes
        .into_iter()
        .map(|b| ALPHANUMERIC[(b as usize) % ALPHANUMERIC.len()] as char)
        .collect()
}

/// A new bearer key: `zrp_` + 30 random alphanumeric characters.
pub fn new_api_key() -> String {
    format!("zrp_{}", random_token(API_KEY_RANDOM_LEN))
}

/// The display prefix of a full key (first 12 characters).
pub fn key_prefix(full_key: &str) -> String {
    full_key.chars().take(API_KEY_PREFIX_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format() {
        let key = new_api_key();
        assert!(key.starts_with("zrp_"));
        assert_eq!(key.len(), 4 + API_KEY_RANDOM_LEN);
        assert!(key[4..].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn prefix_is_twelve_chars() {
        let key = new_api_key();
        let prefix = key_prefix(&key);
        assert_eq!(prefix.len(), 12);
        assert!(key.starts_with(&prefix));
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(random_token(SESSION_TOKEN_LEN), random_token(SESSION_TOKEN_LEN));
    }
}
