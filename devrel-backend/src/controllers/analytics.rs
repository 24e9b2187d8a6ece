use actix_web::{web, HttpResponse};

use crate::analytics::{funnel, roi};
use crate::controllers::activities::check_range;
use crate::db::ActivityFilter;
use crate::errors::{ServiceError, ServiceResult};
use crate::middleware::AuthContext;
use crate::models::funnel::FunnelQuery;
use crate::models::TokenScope;
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/analytics")
            .route("/funnel", web::get().to(funnel_report))
            .route("/funnel/timeline", web::get().to(funnel_timeline))
            .route("/roi", web::get().to(roi_report)),
    );
}

fn funnel_filter(state: &AppState, tenant_id: &str, query: &FunnelQuery) -> ServiceResult<ActivityFilter> {
    check_range(query.from.as_ref(), query.to.as_ref())?;
    if let Some(campaign_id) = &query.campaign_id {
        if state.db.get_campaign(tenant_id, campaign_id)?.is_none() {
            return Err(ServiceError::not_found("Campaign"));
        }
    }
    Ok(ActivityFilter {
        campaign_id: query.campaign_id.clone(),
        from: query.from,
        to: query.to,
        ..Default::default()
    })
}

async fn funnel_report(
    state: web::Data<AppState>,
    auth: AuthContext,
    query: web::Query<FunnelQuery>,
) -> ServiceResult<HttpResponse> {
    auth.require_scope(TokenScope::AnalyticsRead)?;
    let filter = funnel_filter(&state, &auth.tenant_id, &query)?;
    let rows = state.db.funnel_rows(&auth.tenant_id, &filter)?;
    let resolver = state.db.stage_resolver(&auth.tenant_id)?;
    Ok(HttpResponse::Ok().json(funnel::build_report(&rows, &resolver, &query)))
}

async fn funnel_timeline(
    state: web::Data<AppState>,
    auth: AuthContext,
    query: web::Query<FunnelQuery>,
) -> ServiceResult<HttpResponse> {
    auth.require_scope(TokenScope::AnalyticsRead)?;
    let filter = funnel_filter(&state, &auth.tenant_id, &query)?;
    let rows = state.db.timeline_rows(&auth.tenant_id, &filter)?;
    let resolver = state.db.stage_resolver(&auth.tenant_id)?;
    Ok(HttpResponse::Ok().json(funnel::build_timeline(&rows, &resolver)))
}

async fn roi_report(state: web::Data<AppState>, auth: AuthContext) -> ServiceResult<HttpResponse> {
    auth.require_scope(TokenScope::AnalyticsRead)?;
    let campaigns = state.db.campaign_costs(&auth.tenant_id)?;
    let links = state.db.attributed_activities(&auth.tenant_id, None)?;
    Ok(HttpResponse::Ok().json(roi::compute(&campaigns, &links)))
}

#[cfg(test)]
mod tests {
    use crate::controllers::test_support::TestEnv;
    use crate::crypto::{generate_api_token, hash_token};
    use crate::models::TokenScope;
    use actix_web::http::StatusCode;
    use actix_web::test;
    use serde_json::{json, Value};

    macro_rules! post_activity {
        ($app:expr, $env:expr, $body:expr) => {{
            let req = test::TestRequest::post()
                .uri("/api/activities")
                .insert_header($env.admin_auth())
                .set_json($body)
                .to_request();
            assert_eq!(test::call_service($app, req).await.status(), StatusCode::CREATED);
        }};
    }

    #[actix_web::test]
    async fn test_funnel_report_and_timeline() {
        let env = TestEnv::new();
        let app = crate::test_app!(env);

        for (action, anon, at) in [
            ("click", "a", "2024-03-01T09:00:00Z"),
            ("click", "a", "2024-03-01T10:00:00Z"),
            ("click", "b", "2024-03-01T11:00:00Z"),
            ("star", "a", "2024-03-02T09:00:00Z"),
            ("signup", "a", "2024-03-02T12:00:00Z"),
            ("mystery", "c", "2024-03-02T13:00:00Z"),
        ] {
            post_activity!(&app, env, json!({"action": action, "source": "web", "anon_id": anon, "occurred_at": at}));
        }

        let req = test::TestRequest::get()
            .uri("/api/analytics/funnel")
            .insert_header(env.admin_auth())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let stages = body["stages"].as_array().unwrap();
        assert_eq!(stages.len(), 4);
        assert_eq!(stages[0]["stage"], "awareness");
        assert_eq!(stages[0]["activity_count"], 3);
        assert_eq!(stages[0]["unique_developers"], 2);
        assert!(stages[0]["conversion_rate"].is_null());
        assert_eq!(stages[1]["conversion_rate"], 0.5);
        assert_eq!(stages[2]["conversion_rate"], 1.0);
        assert_eq!(body["unmapped"]["activity_count"], 1);
        assert_eq!(body["unmapped"]["actions"], json!(["mystery"]));

        let req = test::TestRequest::get()
            .uri("/api/analytics/funnel/timeline?from=2024-03-01T00:00:00Z&to=2024-03-31T00:00:00Z")
            .insert_header(env.admin_auth())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let points = body.as_array().unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0]["date"], "2024-03-01");
        assert_eq!(points[0]["awareness"], 3);
        assert_eq!(points[1]["engagement"], 1);
        assert_eq!(points[1]["adoption"], 1);

        let req = test::TestRequest::get()
            .uri("/api/analytics/funnel?from=2024-04-01T00:00:00Z&to=2024-03-01T00:00:00Z")
            .insert_header(env.admin_auth())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get()
            .uri("/api/analytics/funnel?campaign_id=missing")
            .insert_header(env.admin_auth())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_roi_splits_value_across_campaigns() {
        let env = TestEnv::new();
        let app = crate::test_app!(env);

        let mut ids = Vec::new();
        for name in ["Launch", "Meetup"] {
            let req = test::TestRequest::post()
                .uri("/api/campaigns")
                .insert_header(env.admin_auth())
                .set_json(json!({"name": name}))
                .to_request();
            let campaign: Value = test::call_and_read_body_json(&app, req).await;
            ids.push(campaign["id"].as_str().unwrap().to_string());
        }
        let req = test::TestRequest::post()
            .uri(&format!("/api/campaigns/{}/budgets", ids[0]))
            .insert_header(env.admin_auth())
            .set_json(json!({"amount": 100.0, "category": "ads"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        post_activity!(
            &app,
            env,
            json!({"action": "signup", "source": "web", "anon_id": "a", "value": 300.0, "campaign_ids": ids})
        );

        let plaintext = generate_api_token();
        env.db()
            .create_api_token(
                &env.tenant_id,
                "bi",
                &hash_token(&plaintext),
                &plaintext[..8],
                &[TokenScope::AnalyticsRead],
                None,
                None,
            )
            .unwrap();
        let req = test::TestRequest::get()
            .uri("/api/analytics/roi")
            .insert_header(TestEnv::bearer(&plaintext))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        let launch = rows.iter().find(|r| r["campaign_name"] == "Launch").unwrap();
        assert_eq!(launch["attributed_value"], 150.0);
        assert_eq!(launch["roi"], 0.5);
        let meetup = rows.iter().find(|r| r["campaign_name"] == "Meetup").unwrap();
        assert!(meetup["roi"].is_null());
    }

    #[actix_web::test]
    async fn test_analytics_requires_auth() {
        let env = TestEnv::new();
        let app = crate::test_app!(env);
        let req = test::TestRequest::get().uri("/api/analytics/funnel").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }
}
