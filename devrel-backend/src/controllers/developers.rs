use actix_web::{web, HttpResponse};

use crate::errors::{ServiceError, ServiceResult};
use crate::middleware::AuthContext;
use crate::models::developer::{
    CreateDeveloperRequest, CreateOrganizationRequest, DeveloperListQuery, MergeDevelopersRequest,
    ResolveDeveloperRequest, ResolveDeveloperResponse, UpdateDeveloperRequest,
};
use crate::models::{IdentifierInput, PageParams, Paginated, TokenScope};
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/organizations")
            .route("", web::get().to(list_organizations))
            .route("", web::post().to(create_organization)),
    );
    cfg.service(
        web::scope("/api/developers")
            .route("", web::get().to(list_developers))
            .route("", web::post().to(create_developer))
            .route("/resolve", web::post().to(resolve_developer))
            .route("/{id}", web::get().to(get_developer))
            .route("/{id}", web::patch().to(update_developer))
            .route("/{id}", web::put().to(update_developer))
            .route("/{id}", web::delete().to(delete_developer))
            .route("/{id}/identifiers", web::get().to(list_identifiers))
            .route("/{id}/identifiers", web::post().to(add_identifier))
            .route("/{id}/identifiers/{identifier_id}", web::delete().to(remove_identifier))
            .route("/{id}/merge", web::post().to(merge_developer)),
    );
}

fn normalize_all(identifiers: &[IdentifierInput]) -> ServiceResult<Vec<IdentifierInput>> {
    identifiers.iter().map(IdentifierInput::normalized_or_400).collect()
}

fn check_org(state: &AppState, tenant_id: &str, org_id: Option<&str>) -> ServiceResult<()> {
    match org_id {
        Some(org_id) if !state.db.organization_exists(tenant_id, org_id)? => {
            Err(ServiceError::invalid("org_id", "unknown organization"))
        }
        _ => Ok(()),
    }
}

fn identifier_conflict(e: rusqlite::Error) -> ServiceError {
    if crate::errors::is_unique_violation(&e) {
        ServiceError::Conflict("Identifier already belongs to a developer".to_string())
    } else {
        e.into()
    }
}

async fn list_organizations(state: web::Data<AppState>, auth: AuthContext) -> ServiceResult<HttpResponse> {
    auth.require_scope(TokenScope::DevelopersRead)?;
    Ok(HttpResponse::Ok().json(state.db.list_organizations(&auth.tenant_id)?))
}

async fn create_organization(
    state: web::Data<AppState>,
    auth: AuthContext,
    body: web::Json<CreateOrganizationRequest>,
) -> ServiceResult<HttpResponse> {
    auth.require_scope(TokenScope::DevelopersWrite)?;
    body.validate()?;
    let org = state.db.create_organization(&auth.tenant_id, &body)?;
    Ok(HttpResponse::Created().json(org))
}

async fn list_developers(
    state: web::Data<AppState>,
    auth: AuthContext,
    page: web::Query<PageParams>,
    query: web::Query<DeveloperListQuery>,
) -> ServiceResult<HttpResponse> {
    auth.require_scope(TokenScope::DevelopersRead)?;
    let page = page.validate()?;
    let (items, total) = state.db.list_developers(&auth.tenant_id, &query, page)?;
    Ok(HttpResponse::Ok().json(Paginated::new(items, total, page)))
}

async fn create_developer(
    state: web::Data<AppState>,
    auth: AuthContext,
    body: web::Json<CreateDeveloperRequest>,
) -> ServiceResult<HttpResponse> {
    auth.require_scope(TokenScope::DevelopersWrite)?;
    body.validate()?;
    check_org(&state, &auth.tenant_id, body.org_id.as_deref())?;
    let identifiers = normalize_all(&body.identifiers)?;

    let developer = state
        .db
        .create_developer(&auth.tenant_id, &body, &identifiers)
        .map_err(identifier_conflict)?;
    let detail = state
        .db
        .get_developer_detail(&auth.tenant_id, &developer.id)?
        .ok_or_else(|| ServiceError::not_found("Developer"))?;
    Ok(HttpResponse::Created().json(detail))
}

async fn get_developer(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    auth.require_scope(TokenScope::DevelopersRead)?;
    let detail = state
        .db
        .get_developer_detail(&auth.tenant_id, &path)?
        .ok_or_else(|| ServiceError::not_found("Developer"))?;
    Ok(HttpResponse::Ok().json(detail))
}

async fn update_developer(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
    body: web::Json<UpdateDeveloperRequest>,
) -> ServiceResult<HttpResponse> {
    auth.require_scope(TokenScope::DevelopersWrite)?;
    body.validate()?;
    check_org(&state, &auth.tenant_id, body.org_id.as_deref())?;
    let developer = state
        .db
        .update_developer(&auth.tenant_id, &path, &body)?
        .ok_or_else(|| ServiceError::not_found("Developer"))?;
    Ok(HttpResponse::Ok().json(developer))
}

async fn delete_developer(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    auth.require_scope(TokenScope::DevelopersWrite)?;
    if !state.db.delete_developer(&auth.tenant_id, &path)? {
        return Err(ServiceError::not_found("Developer"));
    }
    Ok(HttpResponse::NoContent().finish())
}

async fn list_identifiers(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    auth.require_scope(TokenScope::DevelopersRead)?;
    if state.db.get_developer(&auth.tenant_id, &path)?.is_none() {
        return Err(ServiceError::not_found("Developer"));
    }
    Ok(HttpResponse::Ok().json(state.db.list_identifiers(&auth.tenant_id, &path)?))
}

async fn add_identifier(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
    body: web::Json<IdentifierInput>,
) -> ServiceResult<HttpResponse> {
    auth.require_scope(TokenScope::DevelopersWrite)?;
    let identifier = body.normalized_or_400()?;
    if state.db.get_developer(&auth.tenant_id, &path)?.is_none() {
        return Err(ServiceError::not_found("Developer"));
    }
    let created = state
        .db
        .add_identifier(&auth.tenant_id, &path, &identifier)
        .map_err(identifier_conflict)?;
    Ok(HttpResponse::Created().json(created))
}

async fn remove_identifier(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<(String, String)>,
) -> ServiceResult<HttpResponse> {
    auth.require_scope(TokenScope::DevelopersWrite)?;
    let (developer_id, identifier_id) = path.into_inner();
    if !state.db.remove_identifier(&auth.tenant_id, &developer_id, &identifier_id)? {
        return Err(ServiceError::not_found("Identifier"));
    }
    Ok(HttpResponse::NoContent().finish())
}

async fn resolve_developer(
    state: web::Data<AppState>,
    auth: AuthContext,
    body: web::Json<ResolveDeveloperRequest>,
) -> ServiceResult<HttpResponse> {
    auth.require_scope(TokenScope::DevelopersWrite)?;
    if body.identifiers.is_empty() {
        return Err(ServiceError::invalid("identifiers", "at least one identifier is required"));
    }
    let identifiers = normalize_all(&body.identifiers)?;

    let resolution = state
        .db
        .resolve_developer(&auth.tenant_id, &identifiers, body.display_name.as_deref())?;
    if !resolution.conflicting_developer_ids.is_empty() {
        log::info!(
            "Identifiers for developer {} also match {:?}; not merging automatically",
            resolution.developer_id,
            resolution.conflicting_developer_ids
        );
    }

    let developer = state
        .db
        .get_developer(&auth.tenant_id, &resolution.developer_id)?
        .ok_or_else(|| ServiceError::not_found("Developer"))?;

    let response = ResolveDeveloperResponse {
        developer,
        created: resolution.created,
        attached: resolution.attached,
        conflicting_developer_ids: resolution.conflicting_developer_ids,
    };
    Ok(if response.created {
        HttpResponse::Created().json(response)
    } else {
        HttpResponse::Ok().json(response)
    })
}

async fn merge_developer(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
    body: web::Json<MergeDevelopersRequest>,
) -> ServiceResult<HttpResponse> {
    let admin = auth.require_admin()?;
    if body.source_id == *path {
        return Err(ServiceError::invalid("source_id", "cannot merge a developer into itself"));
    }
    if !state.db.merge_developers(&auth.tenant_id, &path, &body.source_id)? {
        return Err(ServiceError::not_found("Developer"));
    }
    log::info!("{} merged developer {} into {}", admin.email, body.source_id, path);

    let detail = state
        .db
        .get_developer_detail(&auth.tenant_id, &path)?
        .ok_or_else(|| ServiceError::not_found("Developer"))?;
    Ok(HttpResponse::Ok().json(detail))
}
