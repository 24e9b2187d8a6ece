//! Request authentication
//!
//! Handlers take an `AuthContext` argument; extraction fails with 401 when the
//! request carries no valid credential. Accepted credentials, in order:
//! - `Authorization: Bearer dtk_...` API token (scoped, no role)
//! - `Authorization: Bearer <session token>`
//! - `session` cookie holding a session token

use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use chrono::Utc;
use futures_util::future::{ready, Ready};

use crate::crypto::{hash_token, API_TOKEN_PREFIX};
use crate::db::Database;
use crate::errors::{ServiceError, ServiceResult};
use crate::models::{ApiToken, Role, TokenScope, User};
use crate::AppState;

pub const SESSION_COOKIE: &str = "session";

#[derive(Debug, Clone)]
pub enum Principal {
    User(User),
    Token(ApiToken),
}

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub tenant_id: String,
    pub principal: Principal,
}

impl AuthContext {
    pub fn user(&self) -> Option<&User> {
        match &self.principal {
            Principal::User(user) => Some(user),
            Principal::Token(_) => None,
        }
    }

    /// Endpoints that only make sense for a logged-in person
    pub fn require_user(&self) -> ServiceResult<&User> {
        self.user()
            .ok_or_else(|| ServiceError::Forbidden("This endpoint requires a user session".to_string()))
    }

    pub fn require_admin(&self) -> ServiceResult<&User> {
        let user = self.require_user()?;
        if user.role != Role::Admin {
            return Err(ServiceError::Forbidden("Admin role required".to_string()));
        }
        Ok(user)
    }

    /// Sessions carry every scope; API tokens only what they were issued with
    pub fn require_scope(&self, scope: TokenScope) -> ServiceResult<()> {
        match &self.principal {
            Principal::User(_) => Ok(()),
            Principal::Token(token) if token.has_scope(scope) => Ok(()),
            Principal::Token(_) => Err(ServiceError::Forbidden(format!("API token lacks scope '{}'", scope))),
        }
    }
}

/// Bearer token from the Authorization header, falling back to the session cookie
pub fn extract_token(req: &HttpRequest) -> Option<String> {
    let bearer = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|value| {
            let (scheme, token) = value.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim().to_string())
        })
        .filter(|t| !t.is_empty());

    bearer.or_else(|| req.cookie(SESSION_COOKIE).map(|c| c.value().to_string()).filter(|t| !t.is_empty()))
}

pub fn authenticate(db: &Database, req: &HttpRequest) -> ServiceResult<AuthContext> {
    let token = extract_token(req).ok_or_else(|| ServiceError::Unauthorized("No authorization token provided".to_string()))?;
    let token_hash = hash_token(&token);

    if token.starts_with(API_TOKEN_PREFIX) {
        let api_token = db
            .find_api_token_by_hash(&token_hash)?
            .filter(|t| t.revoked_at.is_none() && t.expires_at.is_none_or(|exp| exp > Utc::now()))
            .ok_or_else(|| ServiceError::Unauthorized("Invalid, expired or revoked API token".to_string()))?;

        if let Err(e) = db.touch_api_token(&api_token.id) {
            log::warn!("Failed to update last_used_at for token {}: {}", api_token.id, e);
        }
        return Ok(AuthContext {
            tenant_id: api_token.tenant_id.clone(),
            principal: Principal::Token(api_token),
        });
    }

    match db.validate_session(&token_hash)? {
        Some((session, user)) => Ok(AuthContext {
            tenant_id: session.tenant_id,
            principal: Principal::User(user),
        }),
        None => Err(ServiceError::Unauthorized("Invalid or expired session".to_string())),
    }
}

impl FromRequest for AuthContext {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let result = match req.app_data::<web::Data<AppState>>() {
            Some(state) => authenticate(&state.db, req).map_err(Into::into),
            None => Err(ServiceError::Internal("application state missing".to_string()).into()),
        };
        ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::cookie::Cookie;
    use actix_web::test::TestRequest;

    fn setup() -> (Database, User) {
        let db = Database::new(":memory:").unwrap();
        let (_, user) = db.create_tenant_with_admin("Acme", "a@acme.io", "Admin", "hash").unwrap();
        (db, user)
    }

    #[test]
    fn test_extract_token_sources() {
        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer abc"))
            .to_http_request();
        assert_eq!(extract_token(&req).as_deref(), Some("abc"));

        let req = TestRequest::default().cookie(Cookie::new(SESSION_COOKIE, "xyz")).to_http_request();
        assert_eq!(extract_token(&req).as_deref(), Some("xyz"));

        let req = TestRequest::default()
            .insert_header(("Authorization", "Basic Zm9vOmJhcg=="))
            .to_http_request();
        assert_eq!(extract_token(&req), None);
    }

    #[test]
    fn test_session_authentication() {
        let (db, user) = setup();
        db.create_session(&user.id, &user.tenant_id, &hash_token("sess-1"), 1).unwrap();

        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer sess-1"))
            .to_http_request();
        let ctx = authenticate(&db, &req).unwrap();
        assert_eq!(ctx.tenant_id, user.tenant_id);
        assert!(ctx.require_admin().is_ok());
        assert!(ctx.require_scope(TokenScope::PluginsEvents).is_ok());

        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer nope"))
            .to_http_request();
        assert!(matches!(authenticate(&db, &req), Err(ServiceError::Unauthorized(_))));
        assert!(matches!(
            authenticate(&db, &TestRequest::default().to_http_request()),
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_api_token_authentication_and_scopes() {
        let (db, user) = setup();
        let plaintext = crate::crypto::generate_api_token();
        let token = db
            .create_api_token(
                &user.tenant_id,
                "ci",
                &hash_token(&plaintext),
                &plaintext[..8],
                &[TokenScope::ActivitiesWrite],
                Some(&user.id),
                None,
            )
            .unwrap();

        let req = TestRequest::default()
            .insert_header(("Authorization", format!("Bearer {}", plaintext)))
            .to_http_request();
        let ctx = authenticate(&db, &req).unwrap();
        assert!(ctx.require_scope(TokenScope::ActivitiesWrite).is_ok());
        assert!(matches!(ctx.require_scope(TokenScope::AnalyticsRead), Err(ServiceError::Forbidden(_))));
        assert!(matches!(ctx.require_admin(), Err(ServiceError::Forbidden(_))));

        let stored = db.get_api_token(&user.tenant_id, &token.id).unwrap().unwrap();
        assert!(stored.last_used_at.is_some());

        db.revoke_api_token(&user.tenant_id, &token.id).unwrap();
        assert!(matches!(authenticate(&db, &req), Err(ServiceError::Unauthorized(_))));
    }
}
