use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::errors::{ServiceResult, Validator};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub tenant_id: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub tenant_name: String,
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

impl RegisterRequest {
    pub fn validate(&self) -> ServiceResult<()> {
        Validator::new()
            .check(!self.tenant_name.trim().is_empty(), "tenant_name", "is required")
            .check(is_plausible_email(&self.email), "email", "must be a valid email address")
            .check(self.password.chars().count() >= 8, "password", "must be at least 8 characters")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: User,
    pub tenant: Tenant,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
    pub role: Option<Role>,
}

impl CreateUserRequest {
    pub fn validate(&self) -> ServiceResult<()> {
        Validator::new()
            .check(is_plausible_email(&self.email), "email", "must be a valid email address")
            .check(self.password.chars().count() >= 8, "password", "must be at least 8 characters")
            .finish()
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_plausible_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_checks() {
        assert!(is_plausible_email("dev@example.com"));
        assert!(!is_plausible_email("dev@localhost"));
        assert!(!is_plausible_email("@example.com"));
        assert!(!is_plausible_email("example.com"));
        assert_eq!(normalize_email("  Dev@Example.COM "), "dev@example.com");
    }

    #[test]
    fn test_role_strings() {
        assert_eq!(Role::Admin.as_ref(), "admin");
        assert_eq!("member".parse::<Role>().unwrap(), Role::Member);
    }
}
