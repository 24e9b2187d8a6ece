//! `plugin.json` manifest model, validation and config handling
//!
//! Manifests use camelCase keys:
//!
//! ```json
//! {
//!   "id": "github", "name": "GitHub", "version": "1.2.0",
//!   "endpoint": "http://localhost:9100",
//!   "settings": [{"key": "token", "label": "Token", "type": "secret", "required": true}],
//!   "widgets": [{"id": "stars", "title": "Stars"}],
//!   "jobs": [{"name": "sync", "route": "/jobs/sync", "timeoutSec": 60,
//!             "retry": {"maxAttempts": 3, "backoffSec": [1, 5, 15]}}]
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::time::Duration;

use crate::crypto::SecretCipher;
use crate::errors::{ServiceError, ServiceResult, Validator};

pub const DEFAULT_TIMEOUT_SEC: u64 = 300;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1;
pub const DEFAULT_BACKOFF_SEC: [u64; 3] = [1, 5, 15];

/// Config key that, when set, makes event ingestion require an HMAC signature
pub const WEBHOOK_SECRET_KEY: &str = "webhook_secret";
/// What secret config values look like on the way out
pub const MASKED_SECRET: &str = "********";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Base URL that job routes are appended to
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub settings: Vec<SettingField>,
    #[serde(default)]
    pub menus: Vec<MenuItem>,
    #[serde(default)]
    pub widgets: Vec<WidgetDef>,
    #[serde(default)]
    pub routes: Vec<RouteDef>,
    #[serde(default)]
    pub jobs: Vec<JobDef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    String,
    Number,
    Boolean,
    Secret,
    Select,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SettingField {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: SettingType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub label: String,
    pub path: String,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WidgetDef {
    pub id: String,
    pub title: String,
    #[serde(default = "default_widget_w")]
    pub default_w: i64,
    #[serde(default = "default_widget_h")]
    pub default_h: i64,
    #[serde(default)]
    pub data_route: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteDef {
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobDef {
    pub name: String,
    pub route: String,
    #[serde(default = "default_timeout")]
    pub timeout_sec: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl JobDef {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff")]
    pub backoff_sec: Vec<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_sec: DEFAULT_BACKOFF_SEC.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based), clamped to the last entry
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if self.backoff_sec.is_empty() {
            return Duration::ZERO;
        }
        let idx = (attempt.max(1) as usize - 1).min(self.backoff_sec.len() - 1);
        Duration::from_secs(self.backoff_sec[idx])
    }
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SEC
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_backoff() -> Vec<u64> {
    DEFAULT_BACKOFF_SEC.to_vec()
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_widget_w() -> i64 {
    4
}

fn default_widget_h() -> i64 {
    3
}

impl PluginManifest {
    pub fn parse(content: &str) -> Result<Self, String> {
        serde_json::from_str(content).map_err(|e| format!("invalid plugin.json: {}", e))
    }

    /// Structural checks; every problem is reported
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        if self.id.trim().is_empty() {
            problems.push("id is required".to_string());
        }
        if self.name.trim().is_empty() {
            problems.push("name is required".to_string());
        }
        if self.version.trim().is_empty() {
            problems.push("version is required".to_string());
        }
        if let Some(endpoint) = &self.endpoint {
            if !crate::models::campaign::is_http_url(endpoint) {
                problems.push(format!("endpoint '{}' must be an absolute http(s) URL", endpoint));
            }
        }

        let mut keys = HashSet::new();
        for field in &self.settings {
            if !keys.insert(field.key.as_str()) {
                problems.push(format!("duplicate setting '{}'", field.key));
            }
            if field.kind == SettingType::Select && field.options.is_empty() {
                problems.push(format!("select setting '{}' needs options", field.key));
            }
        }

        let mut widgets = HashSet::new();
        for widget in &self.widgets {
            if !widgets.insert(widget.id.as_str()) {
                problems.push(format!("duplicate widget '{}'", widget.id));
            }
        }

        let mut jobs = HashSet::new();
        for job in &self.jobs {
            if !jobs.insert(job.name.as_str()) {
                problems.push(format!("duplicate job '{}'", job.name));
            }
            if !job.route.starts_with('/') {
                problems.push(format!("job '{}' route must start with '/'", job.name));
            }
            if job.timeout_sec == 0 {
                problems.push(format!("job '{}' timeoutSec must be positive", job.name));
            }
            if job.retry.max_attempts == 0 {
                problems.push(format!("job '{}' retry.maxAttempts must be at least 1", job.name));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    pub fn job(&self, name: &str) -> Option<&JobDef> {
        self.jobs.iter().find(|j| j.name == name)
    }

    fn field(&self, key: &str) -> Option<&SettingField> {
        self.settings.iter().find(|f| f.key == key)
    }

    fn is_secret(&self, key: &str) -> bool {
        key == WEBHOOK_SECRET_KEY || self.field(key).is_some_and(|f| f.kind == SettingType::Secret)
    }

    /// Merge `patch` over `current`, validate the result against the settings
    /// schema and encrypt secret values.
    ///
    /// For secret keys: absent or the mask keeps the stored ciphertext, an
    /// empty string or null clears it, anything else is encrypted. For other
    /// keys null removes the value.
    pub fn apply_config(&self, current: &Value, patch: &Value, cipher: &SecretCipher) -> ServiceResult<Value> {
        let Some(patch) = patch.as_object() else {
            return Err(ServiceError::invalid("config", "must be a JSON object"));
        };
        let mut merged: Map<String, Value> = current.as_object().cloned().unwrap_or_default();

        let mut v = Validator::new();
        for (key, value) in patch {
            if key != WEBHOOK_SECRET_KEY && self.field(key).is_none() {
                v.push(&format!("config.{}", key), "unknown setting");
                continue;
            }

            if self.is_secret(key) {
                match value {
                    Value::Null => {
                        merged.remove(key);
                    }
                    Value::String(s) if s.is_empty() => {
                        merged.remove(key);
                    }
                    Value::String(s) if s == MASKED_SECRET => {}
                    Value::String(s) => {
                        merged.insert(key.clone(), Value::String(cipher.encrypt(s)?));
                    }
                    _ => v.push(&format!("config.{}", key), "must be a string"),
                }
                continue;
            }

            if value.is_null() {
                merged.remove(key);
            } else {
                merged.insert(key.clone(), value.clone());
            }
        }

        // Fill defaults, then check the full config against the schema
        for field in &self.settings {
            if !merged.contains_key(&field.key) {
                if let Some(default) = &field.default {
                    merged.insert(field.key.clone(), default.clone());
                }
            }
            let name = format!("config.{}", field.key);
            match merged.get(&field.key) {
                None => {
                    v.check(!field.required, &name, "is required");
                }
                Some(value) => {
                    if let Err(msg) = check_type(field, value) {
                        v.push(&name, msg);
                    }
                }
            }
        }
        v.finish()?;

        Ok(Value::Object(merged))
    }

    /// Config with secret values replaced by a fixed mask
    pub fn mask_config(&self, config: &Value) -> Value {
        match config.as_object() {
            Some(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| {
                        if self.is_secret(k) && v.is_string() {
                            (k.clone(), Value::String(MASKED_SECRET.to_string()))
                        } else {
                            (k.clone(), v.clone())
                        }
                    })
                    .collect(),
            ),
            None => Value::Object(Map::new()),
        }
    }
}

fn check_type(field: &SettingField, value: &Value) -> Result<(), String> {
    let ok = match field.kind {
        // Secret values are ciphertext strings by the time they get here
        SettingType::String | SettingType::Secret => value.is_string(),
        SettingType::Number => value.is_number(),
        SettingType::Boolean => value.is_boolean(),
        SettingType::Select => {
            return match value.as_str() {
                Some(s) if field.options.iter().any(|o| o == s) => Ok(()),
                _ => Err(format!("must be one of {}", field.options.join(", "))),
            };
        }
    };
    if ok {
        Ok(())
    } else {
        Err(format!("must be a {:?}", field.kind).to_lowercase())
    }
}

/// Decrypt one secret config value for point-of-use
pub fn decrypt_secret(config: &Value, key: &str, cipher: &SecretCipher) -> ServiceResult<Option<String>> {
    match config.get(key).and_then(Value::as_str) {
        Some(ciphertext) => Ok(Some(cipher.decrypt(ciphertext)?)),
        None => Ok(None),
    }
}
