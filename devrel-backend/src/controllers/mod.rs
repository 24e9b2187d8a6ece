use actix_web::web;

use crate::errors::{json_error_handler, query_error_handler};

pub mod activities;
pub mod analytics;
pub mod api_tokens;
pub mod auth;
pub mod campaigns;
pub mod dashboard;
pub mod developers;
pub mod health;
pub mod plugins;
pub mod shortlinks;
pub mod system_settings;
pub mod uploads;

/// Largest JSON or raw body accepted (event batches are the biggest payloads)
const BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;

/// Extractor settings plus every route
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(BODY_LIMIT_BYTES)
            .error_handler(json_error_handler),
    )
    .app_data(web::PayloadConfig::new(BODY_LIMIT_BYTES))
    .app_data(web::QueryConfig::default().error_handler(query_error_handler))
    .configure(health::config)
    .configure(auth::config)
    .configure(campaigns::config)
    .configure(developers::config)
    .configure(activities::config)
    .configure(analytics::config)
    .configure(shortlinks::config)
    .configure(api_tokens::config)
    .configure(system_settings::config)
    .configure(plugins::config)
    .configure(dashboard::config)
    .configure(uploads::config);
}
