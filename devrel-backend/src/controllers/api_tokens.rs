use actix_web::{web, HttpResponse};
use chrono::{Duration, Utc};

use crate::crypto::{generate_api_token, hash_token};
use crate::errors::{ServiceError, ServiceResult};
use crate::middleware::AuthContext;
use crate::models::api_token::{CreateApiTokenRequest, CreatedApiTokenResponse};
use crate::models::{PageParams, Paginated};
use crate::AppState;

/// Characters of the plaintext kept for display (`dtk_` plus four)
const DISPLAY_PREFIX_LEN: usize = 8;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/tokens")
            .route("", web::get().to(list_tokens))
            .route("", web::post().to(create_token))
            .route("/{id}", web::get().to(get_token))
            .route("/{id}", web::delete().to(revoke_token)),
    );
}

/// Issue a token. The plaintext appears in this response and nowhere else.
async fn create_token(
    state: web::Data<AppState>,
    auth: AuthContext,
    body: web::Json<CreateApiTokenRequest>,
) -> ServiceResult<HttpResponse> {
    let admin = auth.require_admin()?;
    let scopes = body.validate()?;

    let plaintext = generate_api_token();
    let expires_at = body.expires_in_days.map(|days| Utc::now() + Duration::days(days));
    let token = state.db.create_api_token(
        &auth.tenant_id,
        body.name.trim(),
        &hash_token(&plaintext),
        &plaintext[..DISPLAY_PREFIX_LEN],
        &scopes,
        Some(&admin.id),
        expires_at,
    )?;

    log::info!(
        "API token '{}' ({}) issued by {} with scopes [{}]",
        token.name,
        token.token_prefix,
        admin.email,
        scopes.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ")
    );
    Ok(HttpResponse::Created().json(CreatedApiTokenResponse {
        token: token.to_response(),
        plaintext_token: plaintext,
    }))
}

async fn list_tokens(
    state: web::Data<AppState>,
    auth: AuthContext,
    page: web::Query<PageParams>,
) -> ServiceResult<HttpResponse> {
    auth.require_admin()?;
    let page = page.validate()?;
    let (tokens, total) = state.db.list_api_tokens(&auth.tenant_id, page)?;
    let items = tokens.iter().map(|t| t.to_response()).collect();
    Ok(HttpResponse::Ok().json(Paginated::new(items, total, page)))
}

async fn get_token(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    auth.require_admin()?;
    let token = state
        .db
        .get_api_token(&auth.tenant_id, &path)?
        .ok_or_else(|| ServiceError::not_found("API token"))?;
    Ok(HttpResponse::Ok().json(token.to_response()))
}

async fn revoke_token(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let admin = auth.require_admin()?;
    let token = state
        .db
        .revoke_api_token(&auth.tenant_id, &path)?
        .ok_or_else(|| ServiceError::not_found("API token"))?;
    log::info!("API token {} revoked by {}", token.token_prefix, admin.email);
    Ok(HttpResponse::Ok().json(token.to_response()))
}

#[cfg(test)]
mod tests {
    use crate::controllers::test_support::TestEnv;
    use actix_web::http::StatusCode;
    use actix_web::test;
    use serde_json::{json, Value};

    #[actix_web::test]
    async fn test_token_lifecycle() {
        let env = TestEnv::new();
        let app = crate::test_app!(env);

        let req = test::TestRequest::post()
            .uri("/api/tokens")
            .insert_header(env.admin_auth())
            .set_json(json!({"name": "ci", "scopes": ["activities:write", "activities:read"], "expires_in_days": 30}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(resp).await;
        let plaintext = created["plaintext_token"].as_str().unwrap().to_string();
        let id = created["id"].as_str().unwrap().to_string();
        assert!(plaintext.starts_with("dtk_"));
        assert_eq!(created["token_prefix"], &plaintext[..8]);
        assert_eq!(created["status"], "active");
        assert!(created.get("token_hash").is_none());

        // the new token works and its use is recorded
        let req = test::TestRequest::get()
            .uri("/api/activities")
            .insert_header(TestEnv::bearer(&plaintext))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::get()
            .uri(&format!("/api/tokens/{}", id))
            .insert_header(env.admin_auth())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert!(body.get("plaintext_token").is_none());
        assert!(!body["last_used_at"].is_null());

        let req = test::TestRequest::delete()
            .uri(&format!("/api/tokens/{}", id))
            .insert_header(env.admin_auth())
            .to_request();
        let first: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(first["status"], "revoked");

        let req = test::TestRequest::delete()
            .uri(&format!("/api/tokens/{}", id))
            .insert_header(env.admin_auth())
            .to_request();
        let second: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(first["revoked_at"], second["revoked_at"]);

        let req = test::TestRequest::get()
            .uri("/api/activities")
            .insert_header(TestEnv::bearer(&plaintext))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/api/tokens")
            .insert_header(env.admin_auth())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["total"], 1);
    }

    #[actix_web::test]
    async fn test_token_validation_and_access() {
        let env = TestEnv::new();
        let app = crate::test_app!(env);

        let req = test::TestRequest::post()
            .uri("/api/tokens")
            .insert_header(env.admin_auth())
            .set_json(json!({"name": "bad", "scopes": ["activities:delete"]}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let member = env.member_token();
        let req = test::TestRequest::post()
            .uri("/api/tokens")
            .insert_header(TestEnv::bearer(&member))
            .set_json(json!({"name": "ci", "scopes": ["activities:read"]}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::delete()
            .uri("/api/tokens/unknown")
            .insert_header(env.admin_auth())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let other = env.other_tenant_token();
        let req = test::TestRequest::get()
            .uri("/api/tokens")
            .insert_header(TestEnv::bearer(&other))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["total"], 0);
    }
}
