use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::errors::{ServiceError, ServiceResult, Validator};
use crate::models::account::is_plausible_email;

#[derive(Debug, Clone, Serialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub domain: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
    pub domain: Option<String>,
}

impl CreateOrganizationRequest {
    pub fn validate(&self) -> ServiceResult<()> {
        Validator::new()
            .check(!self.name.trim().is_empty(), "name", "is required")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Developer {
    pub id: String,
    pub tenant_id: String,
    pub display_name: String,
    pub primary_email: Option<String>,
    pub org_id: Option<String>,
    pub avatar_url: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Developer with identifiers, as returned by detail endpoints
#[derive(Debug, Clone, Serialize)]
pub struct DeveloperDetail {
    #[serde(flatten)]
    pub developer: Developer,
    pub identifiers: Vec<Identifier>,
    pub activity_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDeveloperRequest {
    pub display_name: String,
    pub primary_email: Option<String>,
    pub org_id: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub identifiers: Vec<IdentifierInput>,
}

impl CreateDeveloperRequest {
    pub fn validate(&self) -> ServiceResult<()> {
        let mut v = Validator::new();
        v.check(!self.display_name.trim().is_empty(), "display_name", "is required");
        if let Some(email) = &self.primary_email {
            v.check(is_plausible_email(email), "primary_email", "must be a valid email address");
        }
        for (i, identifier) in self.identifiers.iter().enumerate() {
            if let Err(msg) = identifier.normalized() {
                v.push(&format!("identifiers[{}]", i), msg);
            }
        }
        v.finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateDeveloperRequest {
    pub display_name: Option<String>,
    pub primary_email: Option<String>,
    pub org_id: Option<String>,
    pub avatar_url: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl UpdateDeveloperRequest {
    pub fn validate(&self) -> ServiceResult<()> {
        let mut v = Validator::new();
        if let Some(name) = &self.display_name {
            v.check(!name.trim().is_empty(), "display_name", "must not be blank");
        }
        if let Some(email) = &self.primary_email {
            v.check(is_plausible_email(email), "primary_email", "must be a valid email address");
        }
        v.finish()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DeveloperListQuery {
    pub q: Option<String>,
    pub org_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IdentifierKind {
    Email,
    Github,
    Twitter,
    Discord,
    Slack,
    Linkedin,
    Custom,
}

impl IdentifierKind {
    /// Handles and emails compare case-insensitively; custom ids are opaque
    fn case_insensitive(&self) -> bool {
        !matches!(self, IdentifierKind::Custom | IdentifierKind::Slack | IdentifierKind::Discord)
    }

    fn strips_at(&self) -> bool {
        matches!(self, IdentifierKind::Github | IdentifierKind::Twitter)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Identifier {
    pub id: String,
    pub developer_id: String,
    pub kind: IdentifierKind,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentifierInput {
    pub kind: IdentifierKind,
    pub value: String,
}

impl IdentifierInput {
    /// Canonical form used for storage and lookups
    pub fn normalized(&self) -> Result<IdentifierInput, String> {
        let mut value = self.value.trim().to_string();
        if self.kind.strips_at() {
            value = value.trim_start_matches('@').to_string();
        }
        if self.kind.case_insensitive() {
            value = value.to_lowercase();
        }
        if value.is_empty() {
            return Err("identifier value must not be empty".to_string());
        }
        if value.chars().count() > 320 {
            return Err("identifier value is too long".to_string());
        }
        if self.kind == IdentifierKind::Email && !is_plausible_email(&value) {
            return Err("email identifier must be a valid email address".to_string());
        }
        Ok(IdentifierInput {
            kind: self.kind,
            value,
        })
    }

    pub fn normalized_or_400(&self) -> ServiceResult<IdentifierInput> {
        self.normalized().map_err(|msg| ServiceError::invalid("identifier", msg))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveDeveloperRequest {
    pub identifiers: Vec<IdentifierInput>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveDeveloperResponse {
    pub developer: Developer,
    pub created: bool,
    /// Identifiers newly attached to the resolved developer
    pub attached: Vec<IdentifierInput>,
    /// Other developers that own some of the submitted identifiers
    pub conflicting_developer_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeDevelopersRequest {
    pub source_id: String,
}
