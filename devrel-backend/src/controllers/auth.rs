use actix_web::cookie::{time, Cookie, SameSite};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Serialize;

use crate::crypto::{generate_session_token, hash_password, hash_token, verify_password};
use crate::errors::{ServiceError, ServiceResult};
use crate::middleware::auth::{extract_token, SESSION_COOKIE};
use crate::middleware::AuthContext;
use crate::models::account::{
    normalize_email, AuthResponse, CreateUserRequest, LoginRequest, MeResponse, RegisterRequest,
};
use crate::models::{Role, User};
use crate::AppState;

#[derive(Serialize)]
pub struct ValidateResponse {
    valid: bool,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/auth")
            .route("/register", web::post().to(register))
            .route("/login", web::post().to(login))
            .route("/logout", web::post().to(logout))
            .route("/me", web::get().to(me))
            .route("/validate", web::get().to(validate)),
    );
    cfg.service(
        web::resource("/api/users")
            .route(web::get().to(list_users))
            .route(web::post().to(create_user)),
    );
}

/// Argon2 is deliberately slow; keep it off the async workers
async fn hash_off_thread(password: String) -> ServiceResult<String> {
    web::block(move || hash_password(&password))
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?
        .map_err(ServiceError::from)
}

fn session_cookie(token: &str, ttl_hours: i64) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, token.to_string())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::hours(ttl_hours))
        .finish()
}

fn start_session(state: &AppState, user: User, status: actix_web::http::StatusCode) -> ServiceResult<HttpResponse> {
    let token = generate_session_token();
    let session = state.db.create_session(
        &user.id,
        &user.tenant_id,
        &hash_token(&token),
        state.config.session_ttl_hours,
    )?;

    Ok(HttpResponse::build(status)
        .cookie(session_cookie(&token, state.config.session_ttl_hours))
        .json(AuthResponse {
            success: true,
            token,
            expires_at: session.expires_at,
            user,
        }))
}

async fn register(state: web::Data<AppState>, body: web::Json<RegisterRequest>) -> ServiceResult<HttpResponse> {
    body.validate()?;
    let email = normalize_email(&body.email);

    if state.db.get_user_by_email(&email)?.is_some() {
        return Err(ServiceError::Conflict("Email is already registered".to_string()));
    }

    let display_name = body
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| email.split('@').next().unwrap_or(&email))
        .to_string();

    let password_hash = hash_off_thread(body.password.clone()).await?;
    let (tenant, user) = state
        .db
        .create_tenant_with_admin(&body.tenant_name, &email, &display_name, &password_hash)?;

    log::info!("Registered tenant '{}' ({}) with admin {}", tenant.name, tenant.id, user.email);
    start_session(&state, user, actix_web::http::StatusCode::CREATED)
}

async fn login(state: web::Data<AppState>, body: web::Json<LoginRequest>) -> ServiceResult<HttpResponse> {
    let invalid = || ServiceError::Unauthorized("Invalid email or password".to_string());

    let user = state.db.get_user_by_email(&normalize_email(&body.email))?.ok_or_else(invalid)?;

    let password = body.password.clone();
    let stored = user.password_hash.clone();
    let ok = web::block(move || verify_password(&password, &stored))
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?;
    if !ok {
        return Err(invalid());
    }

    start_session(&state, user, actix_web::http::StatusCode::OK)
}

async fn logout(state: web::Data<AppState>, req: HttpRequest) -> ServiceResult<HttpResponse> {
    if let Some(token) = extract_token(&req) {
        state.db.delete_session(&hash_token(&token))?;
    }

    let mut removal = Cookie::build(SESSION_COOKIE, "").path("/").finish();
    removal.make_removal();
    Ok(HttpResponse::NoContent().cookie(removal).finish())
}

async fn me(state: web::Data<AppState>, auth: AuthContext) -> ServiceResult<HttpResponse> {
    let user = auth.require_user()?.clone();
    let tenant = state
        .db
        .get_tenant(&auth.tenant_id)?
        .ok_or_else(|| ServiceError::not_found("Tenant"))?;
    Ok(HttpResponse::Ok().json(MeResponse { user, tenant }))
}

async fn validate(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    let valid = crate::middleware::auth::authenticate(&state.db, &req).is_ok();
    HttpResponse::Ok().json(ValidateResponse { valid })
}

async fn list_users(state: web::Data<AppState>, auth: AuthContext) -> ServiceResult<HttpResponse> {
    auth.require_admin()?;
    let users = state.db.list_users(&auth.tenant_id)?;
    Ok(HttpResponse::Ok().json(users))
}

async fn create_user(
    state: web::Data<AppState>,
    auth: AuthContext,
    body: web::Json<CreateUserRequest>,
) -> ServiceResult<HttpResponse> {
    auth.require_admin()?;
    body.validate()?;
    let email = normalize_email(&body.email);
    if state.db.get_user_by_email(&email)?.is_some() {
        return Err(ServiceError::Conflict("Email is already registered".to_string()));
    }

    let display_name = body.display_name.clone().unwrap_or_else(|| email.clone());
    let password_hash = hash_off_thread(body.password.clone()).await?;
    let user = state.db.create_user(
        &auth.tenant_id,
        &email,
        &display_name,
        &password_hash,
        body.role.unwrap_or(Role::Member),
    )?;
    Ok(HttpResponse::Created().json(user))
}

#[cfg(test)]
mod tests {
    use crate::controllers::test_support::TestEnv;
    use actix_web::http::StatusCode;
    use actix_web::test;
    use serde_json::{json, Value};

    #[actix_web::test]
    async fn test_register_login_logout() {
        let env = TestEnv::new();
        let app = crate::test_app!(env);

        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(json!({
                "tenant_name": "Initech",
                "email": "Peter@Initech.com",
                "password": "tps-reports",
                "display_name": "Peter"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert!(resp.response().cookies().any(|c| c.name() == "session"));
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["user"]["email"], "peter@initech.com");
        assert_eq!(body["user"]["role"], "admin");
        assert!(body["user"].get("password_hash").is_none());

        // same email again
        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(json!({"tenant_name": "X", "email": "peter@initech.com", "password": "tps-reports"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({"email": "peter@initech.com", "password": "wrong-password"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({"email": "peter@initech.com", "password": "tps-reports"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        let token = body["token"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri("/api/auth/me")
            .insert_header(TestEnv::bearer(&token))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["tenant"]["name"], "Initech");

        for _ in 0..2 {
            let req = test::TestRequest::post()
                .uri("/api/auth/logout")
                .insert_header(TestEnv::bearer(&token))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);
        }

        let req = test::TestRequest::get()
            .uri("/api/auth/me")
            .insert_header(TestEnv::bearer(&token))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_register_validation() {
        let env = TestEnv::new();
        let app = crate::test_app!(env);

        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(json!({"tenant_name": "", "email": "nope", "password": "short"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["fields"].as_array().unwrap().len(), 3);
    }

    #[actix_web::test]
    async fn test_user_management_is_admin_only() {
        let env = TestEnv::new();
        let app = crate::test_app!(env);
        let member = env.member_token();

        let req = test::TestRequest::post()
            .uri("/api/users")
            .insert_header(TestEnv::bearer(&member))
            .set_json(json!({"email": "new@acme.io", "password": "long-enough"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri("/api/users")
            .insert_header(env.admin_auth())
            .set_json(json!({"email": "new@acme.io", "password": "long-enough"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["role"], "member");
    }
}
