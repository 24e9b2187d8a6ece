use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{ServiceResult, Validator};
use crate::models::campaign::is_http_url;

/// Source tag carried by activities recorded from shortlink clicks
pub const SHORTLINK_SOURCE: &str = "shortlink";
pub const GENERATED_KEY_LEN: usize = 8;

static KEY_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{3,64}$").expect("valid regex"));

#[derive(Debug, Clone, Serialize)]
pub struct Shortlink {
    pub id: String,
    pub key: String,
    pub target_url: String,
    pub title: Option<String>,
    pub campaign_id: Option<String>,
    pub short_url: String,
    pub click_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shortlink {
    /// Stored links carry a path; responses carry the absolute public URL
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.short_url = format!("{}/s/{}", base_url.trim_end_matches('/'), self.key);
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateShortlinkRequest {
    pub key: Option<String>,
    pub target_url: String,
    pub title: Option<String>,
    pub campaign_id: Option<String>,
}

impl CreateShortlinkRequest {
    pub fn validate(&self) -> ServiceResult<()> {
        let mut v = Validator::new();
        if let Some(key) = &self.key {
            v.check(is_valid_key(key), "key", "must be 3-64 characters of letters, digits, '_' or '-'");
        }
        v.check(is_http_url(&self.target_url), "target_url", "must be an absolute http(s) URL");
        v.finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateShortlinkRequest {
    pub target_url: Option<String>,
    pub title: Option<String>,
    pub campaign_id: Option<String>,
}

impl UpdateShortlinkRequest {
    pub fn validate(&self) -> ServiceResult<()> {
        let mut v = Validator::new();
        if let Some(url) = &self.target_url {
            v.check(is_http_url(url), "target_url", "must be an absolute http(s) URL");
        }
        v.finish()
    }
}

pub fn is_valid_key(key: &str) -> bool {
    KEY_PATTERN.is_match(key)
}

/// Random key from an unambiguous alphabet
pub fn generate_key() -> String {
    use rand::Rng;
    const ALPHABET: &[u8] = b"abcdefghjkmnpqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();
    (0..GENERATED_KEY_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_validation() {
        assert!(is_valid_key("launch-2024"));
        assert!(is_valid_key("abc"));
        assert!(!is_valid_key("ab"));
        assert!(!is_valid_key("has space"));
        assert!(!is_valid_key("slash/key"));
    }

    #[test]
    fn test_generated_keys_are_valid() {
        for _ in 0..50 {
            let key = generate_key();
            assert_eq!(key.len(), GENERATED_KEY_LEN);
            assert!(is_valid_key(&key));
        }
    }
}
