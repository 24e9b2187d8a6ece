//! Single write path for activities
//!
//! The activities API, plugin event processing and shortlink clicks all go
//! through `record_activity`, so they share validation, identity resolution
//! and dedup handling.

use crate::db::Database;
use crate::errors::{is_unique_violation, ServiceError, ServiceResult};
use crate::models::activity::CreateActivityRequest;
use crate::models::Activity;

pub fn record_activity(db: &Database, tenant_id: &str, mut req: CreateActivityRequest) -> ServiceResult<Activity> {
    req.validate()?;

    if let Some(identifier) = req.identifier.take() {
        req.identifier = Some(identifier.normalized_or_400()?);
    }

    if let Some(developer_id) = &req.developer_id {
        if db.get_developer(tenant_id, developer_id)?.is_none() {
            return Err(ServiceError::invalid("developer_id", "unknown developer"));
        }
    }

    req.campaign_ids.sort();
    req.campaign_ids.dedup();
    let missing = db.missing_campaigns(tenant_id, &req.campaign_ids)?;
    if !missing.is_empty() {
        return Err(ServiceError::invalid(
            "campaign_ids",
            format!("unknown campaigns: {}", missing.join(", ")),
        ));
    }

    db.create_activity(tenant_id, &req).map_err(|e| {
        if is_unique_violation(&e) {
            ServiceError::Conflict("An activity with this dedup_key already exists".to_string())
        } else {
            e.into()
        }
    })
}
