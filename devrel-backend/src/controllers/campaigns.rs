use actix_web::{web, HttpResponse};

use crate::analytics::roi;
use crate::errors::{ServiceError, ServiceResult};
use crate::middleware::AuthContext;
use crate::models::campaign::{
    CampaignListQuery, CreateBudgetRequest, CreateCampaignRequest, CreateResourceRequest, ResourceListQuery,
    UpdateCampaignRequest,
};
use crate::models::{PageParams, Paginated, TokenScope};
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/campaigns")
            .route("", web::get().to(list_campaigns))
            .route("", web::post().to(create_campaign))
            .route("/{id}", web::get().to(get_campaign))
            .route("/{id}", web::patch().to(update_campaign))
            .route("/{id}", web::put().to(update_campaign))
            .route("/{id}", web::delete().to(delete_campaign))
            .route("/{id}/budgets", web::get().to(list_budgets))
            .route("/{id}/budgets", web::post().to(add_budget))
            .route("/{id}/budgets/{budget_id}", web::delete().to(delete_budget))
            .route("/{id}/roi", web::get().to(campaign_roi)),
    );
    cfg.service(
        web::scope("/api/resources")
            .route("", web::get().to(list_resources))
            .route("", web::post().to(create_resource))
            .route("/{id}", web::delete().to(delete_resource)),
    );
}

/// 404 unless the campaign belongs to the caller's tenant
fn ensure_campaign(state: &AppState, tenant_id: &str, id: &str) -> ServiceResult<crate::models::Campaign> {
    state
        .db
        .get_campaign(tenant_id, id)?
        .ok_or_else(|| ServiceError::not_found("Campaign"))
}

async fn list_campaigns(
    state: web::Data<AppState>,
    auth: AuthContext,
    page: web::Query<PageParams>,
    query: web::Query<CampaignListQuery>,
) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    let page = page.validate()?;
    let (items, total) = state.db.list_campaigns(&auth.tenant_id, &query, page)?;
    Ok(HttpResponse::Ok().json(Paginated::new(items, total, page)))
}

async fn create_campaign(
    state: web::Data<AppState>,
    auth: AuthContext,
    body: web::Json<CreateCampaignRequest>,
) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    body.validate()?;
    let campaign = state.db.create_campaign(&auth.tenant_id, &body).map_err(|e| {
        if crate::errors::is_unique_violation(&e) {
            ServiceError::Conflict(format!("A campaign named '{}' already exists", body.name.trim()))
        } else {
            e.into()
        }
    })?;
    Ok(HttpResponse::Created().json(campaign))
}

async fn get_campaign(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    let campaign = ensure_campaign(&state, &auth.tenant_id, &path)?;
    Ok(HttpResponse::Ok().json(campaign))
}

async fn update_campaign(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
    body: web::Json<UpdateCampaignRequest>,
) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    let current = ensure_campaign(&state, &auth.tenant_id, &path)?;
    body.validate(&current)?;
    let updated = state
        .db
        .update_campaign(&auth.tenant_id, &path, &body)?
        .ok_or_else(|| ServiceError::not_found("Campaign"))?;
    Ok(HttpResponse::Ok().json(updated))
}

async fn delete_campaign(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    if !state.db.delete_campaign(&auth.tenant_id, &path)? {
        return Err(ServiceError::not_found("Campaign"));
    }
    log::info!("Campaign {} deleted in tenant {}", path, auth.tenant_id);
    Ok(HttpResponse::NoContent().finish())
}

async fn list_budgets(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    ensure_campaign(&state, &auth.tenant_id, &path)?;
    Ok(HttpResponse::Ok().json(state.db.list_budgets(&auth.tenant_id, &path)?))
}

async fn add_budget(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
    body: web::Json<CreateBudgetRequest>,
) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    body.validate()?;
    ensure_campaign(&state, &auth.tenant_id, &path)?;
    let budget = state.db.add_budget(&auth.tenant_id, &path, &body)?;
    Ok(HttpResponse::Created().json(budget))
}

async fn delete_budget(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<(String, String)>,
) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    let (campaign_id, budget_id) = path.into_inner();
    if !state.db.delete_budget(&auth.tenant_id, &campaign_id, &budget_id)? {
        return Err(ServiceError::not_found("Budget"));
    }
    Ok(HttpResponse::NoContent().finish())
}

async fn campaign_roi(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    auth.require_scope(TokenScope::AnalyticsRead)?;
    let campaign = ensure_campaign(&state, &auth.tenant_id, &path)?;
    let cost = state.db.campaign_cost(&auth.tenant_id, &campaign.id)?;
    let links = state.db.attributed_activities(&auth.tenant_id, Some(&campaign.id))?;

    let report = roi::compute(&[(campaign.id, campaign.name, cost)], &links)
        .pop()
        .ok_or_else(|| ServiceError::Internal("ROI computation returned no rows".to_string()))?;
    Ok(HttpResponse::Ok().json(report))
}

async fn list_resources(
    state: web::Data<AppState>,
    auth: AuthContext,
    query: web::Query<ResourceListQuery>,
) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    let resources = state.db.list_resources(&auth.tenant_id, query.campaign_id.as_deref())?;
    Ok(HttpResponse::Ok().json(resources))
}

async fn create_resource(
    state: web::Data<AppState>,
    auth: AuthContext,
    body: web::Json<CreateResourceRequest>,
) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    body.validate()?;
    if let Some(campaign_id) = &body.campaign_id {
        if state.db.get_campaign(&auth.tenant_id, campaign_id)?.is_none() {
            return Err(ServiceError::invalid("campaign_id", "unknown campaign"));
        }
    }
    let resource = state.db.create_resource(&auth.tenant_id, &body)?;
    Ok(HttpResponse::Created().json(resource))
}

async fn delete_resource(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    if !state.db.delete_resource(&auth.tenant_id, &path)? {
        return Err(ServiceError::not_found("Resource"));
    }
    Ok(HttpResponse::NoContent().finish())
}
