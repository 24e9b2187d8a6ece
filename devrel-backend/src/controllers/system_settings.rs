use actix_web::{web, HttpResponse};

use crate::errors::ServiceResult;
use crate::middleware::AuthContext;
use crate::models::system_settings::UpdateSystemSettingsRequest;
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/settings/system")
            .route(web::get().to(get_system_settings))
            .route(web::put().to(update_system_settings)),
    );
}

async fn get_system_settings(state: web::Data<AppState>, auth: AuthContext) -> ServiceResult<HttpResponse> {
    auth.require_admin()?;
    let settings = state.db.get_system_settings(&auth.tenant_id)?;
    Ok(HttpResponse::Ok().json(settings.to_response()))
}

async fn update_system_settings(
    state: web::Data<AppState>,
    auth: AuthContext,
    body: web::Json<UpdateSystemSettingsRequest>,
) -> ServiceResult<HttpResponse> {
    let admin = auth.require_admin()?;
    body.validate()?;
    let settings = state
        .db
        .update_system_settings(&auth.tenant_id, &body, &state.cipher)?;
    log::info!("System settings for tenant {} updated by {}", auth.tenant_id, admin.email);
    Ok(HttpResponse::Ok().json(settings.to_response()))
}
