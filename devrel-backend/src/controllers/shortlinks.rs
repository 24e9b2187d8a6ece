use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::crypto::hash_token;
use crate::errors::{ServiceError, ServiceResult};
use crate::ingest::record_activity;
use crate::middleware::AuthContext;
use crate::models::activity::CreateActivityRequest;
use crate::models::shortlink::{generate_key, CreateShortlinkRequest, UpdateShortlinkRequest, SHORTLINK_SOURCE};
use crate::models::{PageParams, Paginated, Shortlink};
use crate::AppState;

/// Attempts at finding a free generated key before giving up
const KEY_ATTEMPTS: usize = 5;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/shortlinks")
            .route("", web::get().to(list_shortlinks))
            .route("", web::post().to(create_shortlink))
            .route("/{id}", web::get().to(get_shortlink))
            .route("/{id}", web::patch().to(update_shortlink))
            .route("/{id}", web::put().to(update_shortlink))
            .route("/{id}", web::delete().to(delete_shortlink)),
    );
    cfg.route("/s/{key}", web::get().to(follow_shortlink));
}

fn check_campaign(state: &AppState, tenant_id: &str, campaign_id: Option<&String>) -> ServiceResult<()> {
    if let Some(id) = campaign_id {
        if !state.db.missing_campaigns(tenant_id, std::slice::from_ref(id))?.is_empty() {
            return Err(ServiceError::invalid("campaign_id", "unknown campaign"));
        }
    }
    Ok(())
}

fn present(state: &AppState, link: Shortlink) -> Shortlink {
    link.with_base_url(&state.config.public_base_url)
}

async fn list_shortlinks(
    state: web::Data<AppState>,
    auth: AuthContext,
    page: web::Query<PageParams>,
) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    let page = page.validate()?;
    let (links, total) = state.db.list_shortlinks(&auth.tenant_id, page)?;
    let links = links.into_iter().map(|l| present(&state, l)).collect();
    Ok(HttpResponse::Ok().json(Paginated::new(links, total, page)))
}

async fn create_shortlink(
    state: web::Data<AppState>,
    auth: AuthContext,
    body: web::Json<CreateShortlinkRequest>,
) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    body.validate()?;
    check_campaign(&state, &auth.tenant_id, body.campaign_id.as_ref())?;

    let create = |key: &str| {
        state.db.create_shortlink(
            &auth.tenant_id,
            key,
            &body.target_url,
            body.title.as_deref(),
            body.campaign_id.as_deref(),
        )
    };

    let link = match &body.key {
        Some(key) => create(key.as_str()).map_err(|e| match ServiceError::from(e) {
            ServiceError::Conflict(_) => ServiceError::Conflict(format!("Shortlink key '{}' is taken", key)),
            other => other,
        })?,
        None => {
            let mut created = None;
            for _ in 0..KEY_ATTEMPTS {
                match create(generate_key().as_str()).map_err(ServiceError::from) {
                    Ok(link) => {
                        created = Some(link);
                        break;
                    }
                    Err(ServiceError::Conflict(_)) => continue,
                    Err(e) => return Err(e),
                }
            }
            created.ok_or_else(|| ServiceError::Internal("could not allocate a shortlink key".to_string()))?
        }
    };

    log::info!("Shortlink /s/{} -> {} created", link.key, link.target_url);
    Ok(HttpResponse::Created().json(present(&state, link)))
}

async fn get_shortlink(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    let link = state
        .db
        .get_shortlink(&auth.tenant_id, &path)?
        .ok_or_else(|| ServiceError::not_found("Shortlink"))?;
    Ok(HttpResponse::Ok().json(present(&state, link)))
}

async fn update_shortlink(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
    body: web::Json<UpdateShortlinkRequest>,
) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    body.validate()?;
    check_campaign(&state, &auth.tenant_id, body.campaign_id.as_ref())?;
    let link = state
        .db
        .update_shortlink(&auth.tenant_id, &path, &body)?
        .ok_or_else(|| ServiceError::not_found("Shortlink"))?;
    Ok(HttpResponse::Ok().json(present(&state, link)))
}

async fn delete_shortlink(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    if !state.db.delete_shortlink(&auth.tenant_id, &path)? {
        return Err(ServiceError::not_found("Shortlink"));
    }
    Ok(HttpResponse::NoContent().finish())
}

fn header_value(req: &HttpRequest, name: header::HeaderName) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Stable pseudonymous visitor id; the raw address is never stored
fn visitor_id(client: &str, user_agent: Option<&str>) -> String {
    let digest = hash_token(&format!("{}|{}", client, user_agent.unwrap_or("")));
    format!("visitor:{}", &digest[..16])
}

async fn follow_shortlink(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    // Keyed on the socket peer; forwarded-for headers are client-controlled
    let client = req
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    state.rate_limiter.check(&client)?;

    let (tenant_id, link) = state
        .db
        .get_shortlink_by_key(&path)?
        .ok_or_else(|| ServiceError::not_found("Shortlink"))?;

    let user_agent = header_value(&req, header::USER_AGENT);
    let referrer = header_value(&req, header::REFERER);
    let click = CreateActivityRequest {
        action: "click".to_string(),
        source: SHORTLINK_SOURCE.to_string(),
        anon_id: Some(visitor_id(&client, user_agent.as_deref())),
        metadata: Some(json!({
            "shortlink_id": link.id,
            "referrer": referrer,
            "user_agent": user_agent,
        })),
        campaign_ids: link.campaign_id.iter().cloned().collect(),
        ..Default::default()
    };

    // A redirect must not fail because the click could not be recorded
    if let Err(e) = record_activity(&state.db, &tenant_id, click) {
        log::warn!("Failed to record click on /s/{}: {}", link.key, e);
    }

    Ok(HttpResponse::Found()
        .insert_header((header::LOCATION, link.target_url))
        .finish())
}


#[cfg(test)]
mod tests {
    use crate::controllers::test_support::TestEnv;
    use actix_web::http::{header, StatusCode};
    use actix_web::test;
    use serde_json::{json, Value};
    use std::net::SocketAddr;

    #[actix_web::test]
    async fn test_shortlink_crud_and_redirect() {
        let env = TestEnv::new();
        let app = crate::test_app!(env);

        let req = test::TestRequest::post()
            .uri("/api/campaigns")
            .insert_header(env.admin_auth())
            .set_json(json!({"name": "Launch"}))
            .to_request();
        let campaign: Value = test::call_and_read_body_json(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/api/shortlinks")
            .insert_header(env.admin_auth())
            .set_json(json!({"key": "launch", "target_url": "https://example.com/docs", "campaign_id": campaign["id"]}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let link: Value = test::read_body_json(resp).await;
        assert_eq!(link["short_url"], "http://localhost:8080/s/launch");
        assert_eq!(link["click_count"], 0);

        let req = test::TestRequest::post()
            .uri("/api/shortlinks")
            .insert_header(env.admin_auth())
            .set_json(json!({"key": "launch", "target_url": "https://example.com/other"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::get()
            .uri("/s/launch")
            .insert_header((header::USER_AGENT, "curl/8"))
            .insert_header((header::REFERER, "https://news.example"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "https://example.com/docs");

        let req = test::TestRequest::get()
            .uri(&format!("/api/shortlinks/{}", link["id"].as_str().unwrap()))
            .insert_header(env.admin_auth())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["click_count"], 1);

        let req = test::TestRequest::get()
            .uri("/api/activities?source=shortlink")
            .insert_header(env.admin_auth())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let click = &body["items"][0];
        assert_eq!(click["action"], "click");
        assert_eq!(click["metadata"]["referrer"], "https://news.example");
        assert_eq!(click["campaign_ids"], json!([campaign["id"]]));
    }

    #[actix_web::test]
    async fn test_generated_key_and_validation() {
        let env = TestEnv::new();
        let app = crate::test_app!(env);

        let req = test::TestRequest::post()
            .uri("/api/shortlinks")
            .insert_header(env.admin_auth())
            .set_json(json!({"target_url": "https://example.com"}))
            .to_request();
        let link: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(link["key"].as_str().unwrap().len(), 8);

        for body in [
            json!({"target_url": "/relative"}),
            json!({"target_url": "ftp://example.com"}),
            json!({"key": "a b", "target_url": "https://example.com"}),
            json!({"target_url": "https://example.com", "campaign_id": "nope"}),
        ] {
            let req = test::TestRequest::post()
                .uri("/api/shortlinks")
                .insert_header(env.admin_auth())
                .set_json(body)
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[actix_web::test]
    async fn test_redirect_unknown_and_rate_limited() {
        let env = TestEnv::new();
        let app = crate::test_app!(env);

        // test config allows three requests per window
        for _ in 0..3 {
            let req = test::TestRequest::get().uri("/s/missing").to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
        }
        let req = test::TestRequest::get().uri("/s/missing").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(resp.headers().contains_key("Retry-After"));
    }

    #[actix_web::test]
    async fn test_rate_limit_ignores_forwarded_headers() {
        let env = TestEnv::new();
        let app = crate::test_app!(env);
        let peer: SocketAddr = "10.0.0.1:40000".parse().unwrap();

        let mut statuses = Vec::new();
        for i in 0..5 {
            let req = test::TestRequest::get()
                .uri("/s/missing")
                .peer_addr(peer)
                .insert_header(("X-Forwarded-For", format!("203.0.113.{}", i)))
                .insert_header(("Forwarded", format!("for=198.51.100.{}", i)))
                .to_request();
            statuses.push(test::call_service(&app, req).await.status());
        }
        assert_eq!(&statuses[..3], &[StatusCode::NOT_FOUND; 3]);
        assert_eq!(&statuses[3..], &[StatusCode::TOO_MANY_REQUESTS; 2]);

        // a different socket peer has its own window
        let req = test::TestRequest::get()
            .uri("/s/missing")
            .peer_addr("10.0.0.2:40000".parse().unwrap())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }
}
