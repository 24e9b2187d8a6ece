use actix_web::{web, HttpResponse};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

use crate::analytics::{funnel, roi};
use crate::db::ActivityFilter;
use crate::errors::{ServiceError, ServiceResult};
use crate::models::dashboard::{DashboardLayout, LayoutResponse, WidgetDescriptor, BUILTIN_WIDGETS};
use crate::models::funnel::FunnelQuery;
use crate::models::{Developer, Page};
use crate::middleware::AuthContext;
use crate::AppState;

/// Rows returned by list-style widgets
const WIDGET_ROWS: u32 = 10;

#[derive(Serialize)]
struct TopDeveloper {
    #[serde(flatten)]
    developer: Developer,
    activity_count: i64,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/dashboard")
            .route("/widgets", web::get().to(list_widgets))
            .route("/widgets/{id}/data", web::get().to(widget_data))
            .route("/layout", web::get().to(get_layout))
            .route("/layout", web::put().to(put_layout)),
    );
}

/// Built-ins first, then widgets declared by the tenant's enabled plugins
async fn available_widgets(state: &AppState, tenant_id: &str) -> ServiceResult<Vec<WidgetDescriptor>> {
    let mut widgets: Vec<WidgetDescriptor> = BUILTIN_WIDGETS
        .iter()
        .map(|(id, title, w, h)| WidgetDescriptor {
            id: id.to_string(),
            title: title.to_string(),
            provider: "builtin".to_string(),
            default_w: *w,
            default_h: *h,
        })
        .collect();

    for plugin in state.db.list_plugins(tenant_id)?.into_iter().filter(|p| p.enabled) {
        let manifest = match state.catalog.load(&plugin.key).await {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Skipping widgets of plugin '{}': {}", plugin.key, e);
                continue;
            }
        };
        for widget in &manifest.widgets {
            widgets.push(WidgetDescriptor {
                id: format!("plugin:{}:{}", plugin.key, widget.id),
                title: widget.title.clone(),
                provider: plugin.key.clone(),
                default_w: widget.default_w,
                default_h: widget.default_h,
            });
        }
    }
    Ok(widgets)
}

async fn list_widgets(state: web::Data<AppState>, auth: AuthContext) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    Ok(HttpResponse::Ok().json(available_widgets(&state, &auth.tenant_id).await?))
}

async fn get_layout(state: web::Data<AppState>, auth: AuthContext) -> ServiceResult<HttpResponse> {
    let user = auth.require_user()?;
    let stored = match state.db.get_dashboard_layout(&user.id)? {
        Some(raw) => match serde_json::from_str::<DashboardLayout>(&raw) {
            Ok(layout) => Some(layout),
            Err(e) => {
                log::warn!("Ignoring unreadable dashboard layout for user {}: {}", user.id, e);
                None
            }
        },
        None => None,
    };

    let response = match stored {
        Some(layout) => LayoutResponse { layout, is_default: false },
        None => LayoutResponse {
            layout: DashboardLayout::default_layout(),
            is_default: true,
        },
    };
    Ok(HttpResponse::Ok().json(response))
}

async fn put_layout(
    state: web::Data<AppState>,
    auth: AuthContext,
    body: web::Json<DashboardLayout>,
) -> ServiceResult<HttpResponse> {
    let user = auth.require_user()?;
    let known: HashSet<String> = available_widgets(&state, &auth.tenant_id)
        .await?
        .into_iter()
        .map(|w| w.id)
        .collect();
    body.validate(&known)?;

    let raw = serde_json::to_string(&*body).map_err(|e| ServiceError::Internal(e.to_string()))?;
    state.db.save_dashboard_layout(&auth.tenant_id, &user.id, &raw)?;
    Ok(HttpResponse::Ok().json(LayoutResponse {
        layout: body.into_inner(),
        is_default: false,
    }))
}

fn builtin_data(state: &AppState, tenant_id: &str, widget_id: &str) -> ServiceResult<Option<Value>> {
    let to_value = |v: Result<Value, serde_json::Error>| v.map_err(|e| ServiceError::Internal(e.to_string()));
    let data = match widget_id {
        "funnel_summary" => {
            let rows = state.db.funnel_rows(tenant_id, &ActivityFilter::default())?;
            let resolver = state.db.stage_resolver(tenant_id)?;
            to_value(serde_json::to_value(funnel::build_report(
                &rows,
                &resolver,
                &FunnelQuery::default(),
            )))?
        }
        "campaign_roi" => {
            let campaigns = state.db.campaign_costs(tenant_id)?;
            let links = state.db.attributed_activities(tenant_id, None)?;
            to_value(serde_json::to_value(roi::compute(&campaigns, &links)))?
        }
        "recent_activities" => {
            let page = Page {
                page: 1,
                per_page: WIDGET_ROWS,
            };
            let (items, _) = state.db.list_activities(tenant_id, &ActivityFilter::default(), page)?;
            to_value(serde_json::to_value(items))?
        }
        "top_developers" => {
            let rows: Vec<TopDeveloper> = state
                .db
                .top_developers(tenant_id, WIDGET_ROWS as i64)?
                .into_iter()
                .map(|(developer, activity_count)| TopDeveloper {
                    developer,
                    activity_count,
                })
                .collect();
            to_value(serde_json::to_value(rows))?
        }
        _ => return Ok(None),
    };
    Ok(Some(data))
}

async fn widget_data(
    state: web::Data<AppState>,
    auth: AuthContext,
    path: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    match builtin_data(&state, &auth.tenant_id, &path)? {
        Some(data) => Ok(HttpResponse::Ok().json(serde_json::json!({ "widget_id": path.as_str(), "data": data }))),
        None if path.starts_with("plugin:") => Err(ServiceError::NotFound(format!(
            "Widget '{}' is rendered from its plugin's own data route",
            path
        ))),
        None => Err(ServiceError::NotFound(format!("Widget '{}' not found", path))),
    }
}
