use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use crate::errors::{ServiceResult, Validator};

pub const MAX_TOKEN_LIFETIME_DAYS: i64 = 3650;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr, EnumIter)]
pub enum TokenScope {
    #[serde(rename = "activities:read")]
    #[strum(serialize = "activities:read")]
    ActivitiesRead,
    #[serde(rename = "activities:write")]
    #[strum(serialize = "activities:write")]
    ActivitiesWrite,
    #[serde(rename = "developers:read")]
    #[strum(serialize = "developers:read")]
    DevelopersRead,
    #[serde(rename = "developers:write")]
    #[strum(serialize = "developers:write")]
    DevelopersWrite,
    #[serde(rename = "analytics:read")]
    #[strum(serialize = "analytics:read")]
    AnalyticsRead,
    #[serde(rename = "plugins:events")]
    #[strum(serialize = "plugins:events")]
    PluginsEvents,
}

impl TokenScope {
    pub fn all_names() -> Vec<String> {
        TokenScope::iter().map(|s| s.to_string()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TokenStatus {
    Active,
    Expired,
    Revoked,
}

/// Stored token metadata; never carries the token or its hash outward
#[derive(Debug, Clone, Serialize)]
pub struct ApiToken {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub token_prefix: String,
    pub scopes: Vec<TokenScope>,
    pub created_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiToken {
    pub fn status_at(&self, now: DateTime<Utc>) -> TokenStatus {
        if self.revoked_at.is_some() {
            TokenStatus::Revoked
        } else if self.expires_at.is_some_and(|exp| exp <= now) {
            TokenStatus::Expired
        } else {
            TokenStatus::Active
        }
    }

    pub fn has_scope(&self, scope: TokenScope) -> bool {
        self.scopes.contains(&scope)
    }

    pub fn to_response(&self) -> ApiTokenResponse {
        ApiTokenResponse {
            status: self.status_at(Utc::now()),
            token: self.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiTokenResponse {
    #[serde(flatten)]
    pub token: ApiToken,
    pub status: TokenStatus,
}

/// Returned exactly once, at creation
#[derive(Debug, Clone, Serialize)]
pub struct CreatedApiTokenResponse {
    #[serde(flatten)]
    pub token: ApiTokenResponse,
    pub plaintext_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateApiTokenRequest {
    pub name: String,
    pub scopes: Vec<String>,
    pub expires_in_days: Option<i64>,
}

impl CreateApiTokenRequest {
    /// Validate and parse scopes in one pass
    pub fn validate(&self) -> ServiceResult<Vec<TokenScope>> {
        let mut v = Validator::new();
        v.check(!self.name.trim().is_empty(), "name", "is required");
        v.check(!self.scopes.is_empty(), "scopes", "at least one scope is required");

        let mut scopes = Vec::new();
        for raw in &self.scopes {
            match raw.parse::<TokenScope>() {
                Ok(scope) if !scopes.contains(&scope) => scopes.push(scope),
                Ok(_) => {}
                Err(_) => v.push(
                    "scopes",
                    format!("unknown scope '{}'; valid: {}", raw, TokenScope::all_names().join(", ")),
                ),
            }
        }

        if let Some(days) = self.expires_in_days {
            v.check(
                (1..=MAX_TOKEN_LIFETIME_DAYS).contains(&days),
                "expires_in_days",
                "must be between 1 and 3650",
            );
        }
        v.finish()?;
        Ok(scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token() -> ApiToken {
        ApiToken {
            id: "tok".to_string(),
            tenant_id: "t".to_string(),
            name: "ci".to_string(),
            token_prefix: "dtk_abcd".to_string(),
            scopes: vec![TokenScope::ActivitiesWrite],
            created_by: None,
            expires_at: None,
            revoked_at: None,
            last_used_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_is_computed() {
        let now = Utc::now();
        let mut t = token();
        assert_eq!(t.status_at(now), TokenStatus::Active);

        t.expires_at = Some(now - Duration::seconds(1));
        assert_eq!(t.status_at(now), TokenStatus::Expired);

        t.revoked_at = Some(now);
        assert_eq!(t.status_at(now), TokenStatus::Revoked);
    }

    #[test]
    fn test_scope_parsing() {
        let req = CreateApiTokenRequest {
            name: "ingest".to_string(),
            scopes: vec!["activities:write".to_string(), "activities:write".to_string()],
            expires_in_days: Some(30),
        };
        assert_eq!(req.validate().unwrap(), vec![TokenScope::ActivitiesWrite]);

        let bad = CreateApiTokenRequest {
            name: "ingest".to_string(),
            scopes: vec!["root".to_string()],
            expires_in_days: None,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_serialized_token_has_no_secret() {
        let json = serde_json::to_value(token().to_response()).unwrap();
        assert!(json.get("token_hash").is_none());
        assert!(json.get("plaintext_token").is_none());
        assert_eq!(json["status"], "active");
        assert_eq!(json["scopes"][0], "activities:write");
    }
}
