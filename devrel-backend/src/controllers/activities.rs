use actix_web::{web, HttpResponse};

use crate::db::{ActivityFilter, Database};
use crate::errors::{ServiceError, ServiceResult, Validator};
use crate::ingest::record_activity;
use crate::middleware::AuthContext;
use crate::models::activity::{ActivityListQuery, CreateActivityRequest, UpdateActivityRequest};
use crate::models::funnel::{default_mappings, PutStageMappingsRequest, StageMappingsResponse};
use crate::models::{FunnelStage, PageParams, Paginated, TokenScope};
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/activities")
            .route("", web::get().to(list_activities))
            .route("", web::post().to(create_activity))
            .route("/{id}", web::get().to(get_activity))
            .route("/{id}", web::patch().to(update_activity))
            .route("/{id}", web::delete().to(delete_activity)),
    );
    cfg.service(
        web::resource("/api/funnel/mappings")
            .route(web::get().to(get_mappings))
            .route(web::put().to(put_mappings)),
    );
}

/// Actions the tenant has recorded that currently resolve to `stage`
pub(crate) fn actions_for_stage(db: &Database, tenant_id: &str, stage: FunnelStage) -> ServiceResult<Vec<String>> {
    let resolver = db.stage_resolver(tenant_id)?;
    Ok(db
        .distinct_actions(tenant_id)?
        .into_iter()
        .filter(|action| resolver.stage_for(action) == Some(stage))
        .collect())
}

pub(crate) fn check_range(from: Option<&chrono::DateTime<chrono::Utc>>, to: Option<&chrono::DateTime<chrono::Utc>>) -> ServiceResult<()> {
    if let (Some(from), Some(to)) = (from, to) {
        Validator::new().check(from <= to, "to", "must not be before from").finish()?;
    }
    Ok(())
}

async fn list_activities(
    state: web::Data<AppState>,
    auth: AuthContext,
    page: web::Query<PageParams>,
    query: web::Query<ActivityListQuery>,
) -> ServiceResult<HttpResponse> {
    auth.require_scope(TokenScope::ActivitiesRead)?;
    let page = page.validate()?;
    let query = query.into_inner();
    check_range(query.from.as_ref(), query.to.as_ref())?;

    let actions = match query.stage {
        Some(stage) => Some(actions_for_stage(&state.db, &auth.tenant_id, stage)?),
        None => None,
    };
    let filter = ActivityFilter {
        developer_id: query.developer_id,
        action: query.action,
        source: query.source,
        campaign_id: query.campaign_id,
        actions,
        from: query.from,
        to: query.to,
    };

    let (items, total) = state.db.list_activities(&auth.tenant_id, &filter, page)?;
    Ok(HttpResponse::Ok().json(Paginated::new(items, total, page)))
}

async fn create_activity(
    state: web::Data<AppState>,
    auth: AuthContext,
    body: web::Json<CreateActivityRequest>,
) -> ServiceResult<HttpResponse> {
    auth.require_scope(TokenScope::ActivitiesWrite)?;
    let activity = record_activity(&state.db, &auth.tenant_id, body.into_inner())?;
    Ok(HttpResponse::Created().json(activity))
}

async fn get_activity(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    auth.require_scope(TokenScope::ActivitiesRead)?;
    let activity = state
        .db
        .get_activity(&auth.tenant_id, &path)?
        .ok_or_else(|| ServiceError::not_found("Activity"))?;
    Ok(HttpResponse::Ok().json(activity))
}

async fn update_activity(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
    body: web::Json<UpdateActivityRequest>,
) -> ServiceResult<HttpResponse> {
    let admin = auth.require_admin()?;
    body.validate()?;
    let activity = state
        .db
        .update_activity(&auth.tenant_id, &path, &body)?
        .ok_or_else(|| ServiceError::not_found("Activity"))?;
    log::warn!("Activity {} annotated by {}", activity.id, admin.email);
    Ok(HttpResponse::Ok().json(activity))
}

async fn delete_activity(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let admin = auth.require_admin()?;
    if !state.db.delete_activity(&auth.tenant_id, &path)? {
        return Err(ServiceError::not_found("Activity"));
    }
    log::warn!("Activity {} deleted by {}", path, admin.email);
    Ok(HttpResponse::NoContent().finish())
}

async fn get_mappings(state: web::Data<AppState>, auth: AuthContext) -> ServiceResult<HttpResponse> {
    auth.require_scope(TokenScope::AnalyticsRead)?;
    Ok(HttpResponse::Ok().json(StageMappingsResponse {
        defaults: default_mappings(),
        overrides: state.db.list_stage_overrides(&auth.tenant_id)?,
    }))
}

async fn put_mappings(
    state: web::Data<AppState>,
    auth: AuthContext,
    body: web::Json<PutStageMappingsRequest>,
) -> ServiceResult<HttpResponse> {
    auth.require_admin()?;
    let mut v = Validator::new();
    for (i, mapping) in body.mappings.iter().enumerate() {
        v.check(!mapping.action.trim().is_empty(), &format!("mappings[{}].action", i), "is required");
    }
    v.finish()?;

    state.db.replace_stage_overrides(&auth.tenant_id, &body.mappings)?;
    Ok(HttpResponse::Ok().json(StageMappingsResponse {
        defaults: default_mappings(),
        overrides: state.db.list_stage_overrides(&auth.tenant_id)?,
    }))
}
