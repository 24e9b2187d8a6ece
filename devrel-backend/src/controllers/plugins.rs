use actix_web::{web, HttpRequest, HttpResponse};
use serde::Serialize;
use serde_json::{json, Value};

use crate::crypto::verify_hmac_sha256;
use crate::errors::{ServiceError, ServiceResult};
use crate::middleware::AuthContext;
use crate::models::plugin::{
    EventListQuery, IngestEventsRequest, InstallPluginRequest, PluginDetail, RunJobQuery, RunJobRequest,
    UpdatePluginRequest,
};
use crate::models::{PageParams, Paginated, Plugin, TokenScope};
use crate::plugins::events::process_pending;
use crate::plugins::manifest::{decrypt_secret, WEBHOOK_SECRET_KEY};
use crate::AppState;

/// Most events accepted in one ingest call
pub const MAX_EVENTS_PER_BATCH: usize = 500;
/// `sha256=<hex>` HMAC of the raw request body
pub const SIGNATURE_HEADER: &str = "X-Signature-256";

#[derive(Serialize)]
struct IngestResponse {
    accepted: usize,
    event_ids: Vec<String>,
}

#[derive(Serialize)]
struct AsyncRunResponse {
    run_id: String,
    status: &'static str,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/plugins")
            .route("", web::get().to(list_plugins))
            .route("", web::post().to(install_plugin))
            .route("/available", web::get().to(available_plugins))
            .route("/runs/{run_id}", web::get().to(get_run))
            .route("/{id}", web::get().to(get_plugin))
            .route("/{id}", web::patch().to(update_plugin))
            .route("/{id}", web::delete().to(delete_plugin))
            .route("/{id}/runs", web::get().to(list_runs))
            // POST is addressed by plugin key (external senders), GET by id
            .service(
                web::resource("/{plugin}/events")
                    .route(web::post().to(ingest_events))
                    .route(web::get().to(list_events)),
            )
            .route("/{id}/events/process", web::post().to(process_events))
            .route("/{id}/jobs/{name}/run", web::post().to(run_job)),
    );
}

fn find_plugin(state: &AppState, tenant_id: &str, id: &str) -> ServiceResult<Plugin> {
    state
        .db
        .get_plugin(tenant_id, id)?
        .ok_or_else(|| ServiceError::not_found("Plugin"))
}

/// Plugin with secrets masked and its manifest, if still on disk
async fn detail(state: &AppState, mut plugin: Plugin) -> PluginDetail {
    let manifest = match state.catalog.load(&plugin.key).await {
        Ok(manifest) => {
            plugin.config = manifest.mask_config(&plugin.config);
            Some(manifest.as_ref().clone())
        }
        Err(e) => {
            log::warn!("Installed plugin '{}' has no usable manifest: {}", plugin.key, e);
            plugin.config = json!({});
            None
        }
    };
    PluginDetail { plugin, manifest }
}

async fn available_plugins(state: web::Data<AppState>, auth: AuthContext) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    let manifests = state.catalog.available().await?;
    let manifests: Vec<_> = manifests.iter().map(|m| m.as_ref()).collect();
    Ok(HttpResponse::Ok().json(manifests))
}

async fn list_plugins(state: web::Data<AppState>, auth: AuthContext) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    let mut details = Vec::new();
    for plugin in state.db.list_plugins(&auth.tenant_id)? {
        details.push(detail(&state, plugin).await);
    }
    Ok(HttpResponse::Ok().json(details))
}

async fn install_plugin(
    state: web::Data<AppState>,
    auth: AuthContext,
    body: web::Json<InstallPluginRequest>,
) -> ServiceResult<HttpResponse> {
    let admin = auth.require_admin()?;
    let key = body.key.trim();

    let manifest = state.catalog.load(key).await?;
    if state.db.get_plugin_by_key(&auth.tenant_id, key)?.is_some() {
        return Err(ServiceError::Conflict(format!("Plugin '{}' is already installed", key)));
    }

    let patch = body.config.clone().unwrap_or_else(|| json!({}));
    let config = manifest.apply_config(&json!({}), &patch, &state.cipher)?;
    let plugin = state
        .db
        .install_plugin(&auth.tenant_id, key, &manifest.name, &manifest.version, &config)?;

    log::info!("Plugin '{}' v{} installed by {}", plugin.key, plugin.version, admin.email);
    Ok(HttpResponse::Created().json(detail(&state, plugin).await))
}

async fn get_plugin(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    let plugin = find_plugin(&state, &auth.tenant_id, &path)?;
    Ok(HttpResponse::Ok().json(detail(&state, plugin).await))
}

async fn update_plugin(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
    body: web::Json<UpdatePluginRequest>,
) -> ServiceResult<HttpResponse> {
    auth.require_admin()?;
    let plugin = find_plugin(&state, &auth.tenant_id, &path)?;

    let config = match &body.config {
        Some(patch) => {
            let manifest = state.catalog.load(&plugin.key).await?;
            Some(manifest.apply_config(&plugin.config, patch, &state.cipher)?)
        }
        None => None,
    };

    let plugin = state
        .db
        .update_plugin(&auth.tenant_id, &plugin.id, body.enabled, config.as_ref())?
        .ok_or_else(|| ServiceError::not_found("Plugin"))?;
    Ok(HttpResponse::Ok().json(detail(&state, plugin).await))
}

async fn delete_plugin(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let admin = auth.require_admin()?;
    if !state.db.delete_plugin(&auth.tenant_id, &path)? {
        return Err(ServiceError::not_found("Plugin"));
    }
    log::info!("Plugin {} uninstalled by {}", path, admin.email);
    Ok(HttpResponse::NoContent().finish())
}

async fn list_runs(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
    page: web::Query<PageParams>,
) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    let page = page.validate()?;
    let plugin = find_plugin(&state, &auth.tenant_id, &path)?;
    let (runs, total) = state.db.list_runs(&auth.tenant_id, &plugin.id, page)?;
    Ok(HttpResponse::Ok().json(Paginated::new(runs, total, page)))
}

async fn get_run(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    let run = state
        .db
        .get_run(&auth.tenant_id, &path)?
        .ok_or_else(|| ServiceError::not_found("Run"))?;
    Ok(HttpResponse::Ok().json(run))
}

/// Accept raw events from a plugin. Signed when the plugin has a webhook secret.
async fn ingest_events(
    state: web::Data<AppState>,
    auth: AuthContext,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
) -> ServiceResult<HttpResponse> {
    auth.require_scope(TokenScope::PluginsEvents)?;
    let plugin = state
        .db
        .get_plugin_by_key(&auth.tenant_id, &path)?
        .ok_or_else(|| ServiceError::not_found("Plugin"))?;
    if !plugin.enabled {
        return Err(ServiceError::Conflict(format!("Plugin '{}' is disabled", plugin.key)));
    }

    if let Some(secret) = decrypt_secret(&plugin.config, WEBHOOK_SECRET_KEY, &state.cipher)? {
        let signature = req
            .headers()
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !verify_hmac_sha256(&secret, &body, signature) {
            log::warn!("Rejected unsigned or mis-signed events for plugin '{}'", plugin.key);
            return Err(ServiceError::Unauthorized("Invalid event signature".to_string()));
        }
    }

    let request: IngestEventsRequest = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::invalid("body", format!("invalid JSON: {}", e)))?;
    if request.events.len() > MAX_EVENTS_PER_BATCH {
        return Err(ServiceError::PayloadTooLarge(format!(
            "at most {} events per request",
            MAX_EVENTS_PER_BATCH
        )));
    }
    if request.events.is_empty() {
        return Err(ServiceError::invalid("events", "must not be empty"));
    }

    let event_ids = state.db.insert_raw_events(&auth.tenant_id, &plugin.id, &request.events)?;
    log::debug!("Stored {} raw events for plugin '{}'", event_ids.len(), plugin.key);
    Ok(HttpResponse::Accepted().json(IngestResponse {
        accepted: event_ids.len(),
        event_ids,
    }))
}

async fn list_events(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
    page: web::Query<PageParams>,
    query: web::Query<EventListQuery>,
) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    let page = page.validate()?;
    let plugin = find_plugin(&state, &auth.tenant_id, &path)?;
    let (events, total) = state
        .db
        .list_raw_events(&auth.tenant_id, &plugin.id, query.status, page)?;
    Ok(HttpResponse::Ok().json(Paginated::new(events, total, page)))
}

async fn process_events(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    auth.require_admin()?;
    let plugin = find_plugin(&state, &auth.tenant_id, &path)?;
    let summary = process_pending(&state.db, &auth.tenant_id, &plugin)?;
    log::info!(
        "Processed events for plugin '{}': {} ok, {} failed",
        plugin.key,
        summary.processed,
        summary.failed
    );
    Ok(HttpResponse::Ok().json(summary))
}

async fn run_job(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<(String, String)>,
    query: web::Query<RunJobQuery>,
    body: Option<web::Json<RunJobRequest>>,
) -> ServiceResult<HttpResponse> {
    auth.require_admin()?;
    let (plugin_id, job_name) = path.into_inner();
    let cursor: Option<Value> = body.and_then(|b| b.into_inner().cursor);

    if query.run_async {
        let prepared = state
            .executor
            .prepare(&auth.tenant_id, &plugin_id, &job_name, cursor)
            .await?;
        let run_id = prepared.run_id.clone();
        let executor = state.executor.clone();
        tokio::spawn(async move {
            executor.execute(prepared).await;
        });
        return Ok(HttpResponse::Accepted().json(AsyncRunResponse {
            run_id,
            status: "pending",
        }));
    }

    let result = state
        .executor
        .run(&auth.tenant_id, &plugin_id, &job_name, cursor)
        .await?;
    Ok(HttpResponse::Ok().json(result))
}

#[cfg(test)]
mod tests {
    use super::SIGNATURE_HEADER;
    use crate::controllers::test_support::TestEnv;
    use crate::crypto::{generate_api_token, hash_token};
    use crate::models::TokenScope;
    use actix_web::http::StatusCode;
    use actix_web::test;
    use hmac::{Hmac, Mac};
    use serde_json::{json, Value};
    use sha2::Sha256;

    const MANIFEST: &str = r#"{
        "id": "github",
        "name": "GitHub",
        "version": "1.0.0",
        "endpoint": "http://localhost:9100",
        "settings": [
            {"key": "org", "label": "Organization", "type": "string"},
            {"key": "token", "label": "Token", "type": "secret"}
        ],
        "widgets": [{"id": "stars", "title": "Stars"}],
        "jobs": [{"name": "sync", "route": "/jobs/sync"}]
    }"#;

    fn events_token(env: &TestEnv) -> String {
        let plaintext = generate_api_token();
        env.db()
            .create_api_token(
                &env.tenant_id,
                "github-sender",
                &hash_token(&plaintext),
                &plaintext[..8],
                &[TokenScope::PluginsEvents],
                None,
                None,
            )
            .unwrap();
        plaintext
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[actix_web::test]
    async fn test_install_configure_and_uninstall() {
        let env = TestEnv::new();
        env.write_plugin("github", MANIFEST);
        let app = crate::test_app!(env);

        let req = test::TestRequest::get()
            .uri("/api/plugins/available")
            .insert_header(env.admin_auth())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body[0]["id"], "github");

        let req = test::TestRequest::post()
            .uri("/api/plugins")
            .insert_header(env.admin_auth())
            .set_json(json!({"key": "github", "config": {"org": "acme", "token": "ghp_secret"}}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let plugin: Value = test::read_body_json(resp).await;
        let id = plugin["id"].as_str().unwrap().to_string();
        assert_eq!(plugin["config"]["token"], "********");
        assert_eq!(plugin["manifest"]["jobs"][0]["name"], "sync");

        let req = test::TestRequest::post()
            .uri("/api/plugins")
            .insert_header(env.admin_auth())
            .set_json(json!({"key": "github"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::post()
            .uri("/api/plugins")
            .insert_header(env.admin_auth())
            .set_json(json!({"key": "gitlab"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        // the mask keeps the stored secret, unknown keys are rejected
        let req = test::TestRequest::patch()
            .uri(&format!("/api/plugins/{}", id))
            .insert_header(env.admin_auth())
            .set_json(json!({"enabled": false, "config": {"org": "initech", "token": "********"}}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["enabled"], false);
        assert_eq!(body["config"]["org"], "initech");
        assert_eq!(body["config"]["token"], "********");
        let stored = env.db().get_plugin(&env.tenant_id, &id).unwrap().unwrap();
        assert_eq!(
            crate::plugins::manifest::decrypt_secret(&stored.config, "token", &env.state.cipher).unwrap(),
            Some("ghp_secret".to_string())
        );

        let req = test::TestRequest::patch()
            .uri(&format!("/api/plugins/{}", id))
            .insert_header(env.admin_auth())
            .set_json(json!({"config": {"colour": "blue"}}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let member = env.member_token();
        let req = test::TestRequest::delete()
            .uri(&format!("/api/plugins/{}", id))
            .insert_header(TestEnv::bearer(&member))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/plugins/{}", id))
            .insert_header(env.admin_auth())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);
    }

    #[actix_web::test]
    async fn test_event_ingest_and_processing() {
        let env = TestEnv::new();
        env.write_plugin("github", MANIFEST);
        let app = crate::test_app!(env);

        let req = test::TestRequest::post()
            .uri("/api/plugins")
            .insert_header(env.admin_auth())
            .set_json(json!({"key": "github"}))
            .to_request();
        let plugin: Value = test::call_and_read_body_json(&app, req).await;
        let id = plugin["id"].as_str().unwrap().to_string();
        let token = events_token(&env);

        let req = test::TestRequest::post()
            .uri("/api/plugins/github/events")
            .insert_header(TestEnv::bearer(&token))
            .set_json(json!({"events": [
                {"event_type": "star", "payload": {"anon_id": "gh:octocat", "occurred_at": "2024-05-01T00:00:00Z"}},
                {"event_type": "star", "payload": {"occurred_at": "2024-05-01T00:00:00Z"}}
            ]}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["accepted"], 2);

        let req = test::TestRequest::get()
            .uri(&format!("/api/plugins/{}/events?status=pending", id))
            .insert_header(env.admin_auth())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["total"], 2);

        let req = test::TestRequest::post()
            .uri(&format!("/api/plugins/{}/events/process", id))
            .insert_header(env.admin_auth())
            .to_request();
        let summary: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(summary, json!({"processed": 1, "failed": 1}));

        let req = test::TestRequest::get()
            .uri(&format!("/api/plugins/{}/events?status=failed", id))
            .insert_header(env.admin_auth())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["total"], 1);
        assert!(body["items"][0]["error"].is_string());

        let req = test::TestRequest::get()
            .uri("/api/activities?source=plugin:github")
            .insert_header(env.admin_auth())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["items"][0]["action"], "star");
    }

    #[actix_web::test]
    async fn test_event_ingest_limits_and_signatures() {
        let env = TestEnv::new();
        env.write_plugin("github", MANIFEST);
        let app = crate::test_app!(env);

        let req = test::TestRequest::post()
            .uri("/api/plugins")
            .insert_header(env.admin_auth())
            .set_json(json!({"key": "github", "config": {"webhook_secret": "whsec"}}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);
        let token = events_token(&env);

        let body = serde_json::to_vec(&json!({"events": [{"event_type": "fork", "payload": {"anon_id": "x"}}]})).unwrap();
        let req = test::TestRequest::post()
            .uri("/api/plugins/github/events")
            .insert_header(TestEnv::bearer(&token))
            .insert_header(("Content-Type", "application/json"))
            .set_payload(body.clone())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::post()
            .uri("/api/plugins/github/events")
            .insert_header(TestEnv::bearer(&token))
            .insert_header(("Content-Type", "application/json"))
            .insert_header((SIGNATURE_HEADER, sign("whsec", &body)))
            .set_payload(body.clone())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);

        let events: Vec<Value> = (0..501).map(|i| json!({"event_type": "fork", "payload": {"n": i}})).collect();
        let big = serde_json::to_vec(&json!({ "events": events })).unwrap();
        let req = test::TestRequest::post()
            .uri("/api/plugins/github/events")
            .insert_header(TestEnv::bearer(&token))
            .insert_header((SIGNATURE_HEADER, sign("whsec", &big)))
            .set_payload(big)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::PAYLOAD_TOO_LARGE);

        // a token without plugins:events cannot push
        let plaintext = generate_api_token();
        env.db()
            .create_api_token(
                &env.tenant_id,
                "reader",
                &hash_token(&plaintext),
                &plaintext[..8],
                &[TokenScope::ActivitiesRead],
                None,
                None,
            )
            .unwrap();
        let req = test::TestRequest::post()
            .uri("/api/plugins/github/events")
            .insert_header(TestEnv::bearer(&plaintext))
            .insert_header((SIGNATURE_HEADER, sign("whsec", &body)))
            .set_payload(body)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn test_run_job_sync_and_async() {
        let env = TestEnv::new();
        env.write_plugin("github", MANIFEST);
        let app = crate::test_app!(env);

        let req = test::TestRequest::post()
            .uri("/api/plugins")
            .insert_header(env.admin_auth())
            .set_json(json!({"key": "github"}))
            .to_request();
        let plugin: Value = test::call_and_read_body_json(&app, req).await;
        let id = plugin["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::post()
            .uri(&format!("/api/plugins/{}/jobs/sync/run", id))
            .insert_header(env.admin_auth())
            .set_json(json!({"cursor": {"page": 2}}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let result: Value = test::read_body_json(resp).await;
        assert_eq!(result["status"], "success");
        assert_eq!(result["events_processed"], 1);
        assert_eq!(result["metadata"]["cursor"], json!({"page": 2}));

        let req = test::TestRequest::post()
            .uri(&format!("/api/plugins/{}/jobs/nope/run", id))
            .insert_header(env.admin_auth())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post()
            .uri(&format!("/api/plugins/{}/jobs/sync/run?async=true", id))
            .insert_header(env.admin_auth())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let body: Value = test::read_body_json(resp).await;
        let run_id = body["run_id"].as_str().unwrap().to_string();

        // let the spawned task finish
        let mut status = Value::Null;
        for _ in 0..50 {
            let req = test::TestRequest::get()
                .uri(&format!("/api/plugins/runs/{}", run_id))
                .insert_header(env.admin_auth())
                .to_request();
            let run: Value = test::call_and_read_body_json(&app, req).await;
            status = run["status"].clone();
            if status == "success" {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(status, "success");

        let req = test::TestRequest::get()
            .uri(&format!("/api/plugins/{}/runs", id))
            .insert_header(env.admin_auth())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["total"], 2);
    }
}
