use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ServiceResult, Validator};

pub const AI_PROVIDERS: &[&str] = &["openai", "anthropic", "azure", "custom"];

/// SMTP section as persisted; `password` holds ciphertext
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SmtpSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: Option<String>,
    #[serde(default)]
    pub use_tls: bool,
}

/// S3 section as persisted; `secret_access_key` holds ciphertext
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct S3Settings {
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

/// AI provider section as persisted; `api_key` holds ciphertext
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AiSettings {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

/// Per-tenant singleton row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemSettings {
    pub smtp: SmtpSettings,
    pub s3: S3Settings,
    pub ai: AiSettings,
    pub updated_at: Option<DateTime<Utc>>,
}

/// What the API returns: secrets replaced by masks plus `*_set` flags
#[derive(Debug, Clone, Serialize)]
pub struct SystemSettingsResponse {
    pub smtp: MaskedSmtp,
    pub s3: MaskedS3,
    pub ai: MaskedAi,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaskedSmtp {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub from_address: Option<String>,
    pub use_tls: bool,
    pub password_set: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaskedS3 {
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key_set: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaskedAi {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key_set: bool,
}

impl SystemSettings {
    pub fn to_response(&self) -> SystemSettingsResponse {
        SystemSettingsResponse {
            smtp: MaskedSmtp {
                host: self.smtp.host.clone(),
                port: self.smtp.port,
                username: self.smtp.username.clone(),
                from_address: self.smtp.from_address.clone(),
                use_tls: self.smtp.use_tls,
                password_set: self.smtp.password.is_some(),
            },
            s3: MaskedS3 {
                bucket: self.s3.bucket.clone(),
                region: self.s3.region.clone(),
                endpoint: self.s3.endpoint.clone(),
                access_key_id: self.s3.access_key_id.clone(),
                secret_access_key_set: self.s3.secret_access_key.is_some(),
            },
            ai: MaskedAi {
                provider: self.ai.provider.clone(),
                model: self.ai.model.clone(),
                base_url: self.ai.base_url.clone(),
                api_key_set: self.ai.api_key.is_some(),
            },
            updated_at: self.updated_at,
        }
    }
}

/// Partial update. For secret fields: absent keeps, empty string clears,
/// anything else is encrypted and stored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSystemSettingsRequest {
    pub smtp: Option<SmtpUpdate>,
    pub s3: Option<S3Update>,
    pub ai: Option<AiUpdate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmtpUpdate {
    pub host: Option<String>,
    pub port: Option<i64>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: Option<String>,
    pub use_tls: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct S3Update {
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AiUpdate {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl UpdateSystemSettingsRequest {
    pub fn validate(&self) -> ServiceResult<()> {
        let mut v = Validator::new();
        if let Some(smtp) = &self.smtp {
            if let Some(port) = smtp.port {
                v.check((1..=65535).contains(&port), "smtp.port", "must be between 1 and 65535");
            }
            if let Some(from) = &smtp.from_address {
                v.check(
                    from.is_empty() || crate::models::account::is_plausible_email(from),
                    "smtp.from_address",
                    "must be a valid email address",
                );
            }
        }
        if let Some(s3) = &self.s3 {
            if let Some(endpoint) = &s3.endpoint {
                v.check(
                    endpoint.is_empty() || crate::models::campaign::is_http_url(endpoint),
                    "s3.endpoint",
                    "must be an absolute http(s) URL",
                );
            }
        }
        if let Some(ai) = &self.ai {
            if let Some(provider) = &ai.provider {
                v.check(
                    AI_PROVIDERS.contains(&provider.as_str()),
                    "ai.provider",
                    "must be one of openai, anthropic, azure, custom",
                );
            }
        }
        v.finish()
    }
}

/// Empty string means "clear"
pub fn blank_to_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
