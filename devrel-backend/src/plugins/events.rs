//! Turns pending raw plugin events into activities
//!
//! A raw event payload may carry the activity fields directly:
//!
//! ```json
//! {"action": "star", "identifier": {"kind": "github", "value": "octocat"},
//!  "occurred_at": "2024-05-01T10:00:00Z", "metadata": {"repo": "acme/sdk"}}
//! ```
//!
//! `action` falls back to the event type. The activity source is always
//! `plugin:<key>`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::db::Database;
use crate::errors::{ServiceError, ServiceResult};
use crate::ingest::record_activity;
use crate::models::activity::CreateActivityRequest;
use crate::models::plugin::ProcessEventsSummary;
use crate::models::{IdentifierInput, Plugin, PluginEventRaw, RawEventStatus};

const BATCH_SIZE: i64 = 100;

#[derive(Debug, Default, Deserialize)]
struct EventPayload {
    action: Option<String>,
    occurred_at: Option<DateTime<Utc>>,
    developer_id: Option<String>,
    account_id: Option<String>,
    anon_id: Option<String>,
    identifier: Option<IdentifierInput>,
    value: Option<f64>,
    confidence: Option<f64>,
    metadata: Option<Value>,
    #[serde(default)]
    campaign_ids: Vec<String>,
    dedup_key: Option<String>,
}

fn to_request(plugin: &Plugin, event: &PluginEventRaw) -> Result<CreateActivityRequest, String> {
    let payload: EventPayload =
        serde_json::from_value(event.payload.clone()).map_err(|e| format!("invalid payload: {}", e))?;

    Ok(CreateActivityRequest {
        action: payload.action.unwrap_or_else(|| event.event_type.clone()),
        source: format!("plugin:{}", plugin.key),
        occurred_at: payload.occurred_at,
        developer_id: payload.developer_id,
        account_id: payload.account_id,
        anon_id: payload.anon_id,
        identifier: payload.identifier,
        value: payload.value,
        confidence: payload.confidence,
        metadata: payload.metadata,
        campaign_ids: payload.campaign_ids,
        dedup_key: payload.dedup_key,
    })
}

/// Process every pending event of one plugin. A bad event is marked `failed`
/// with its error and does not stop the batch; a database failure does.
pub fn process_pending(db: &Database, tenant_id: &str, plugin: &Plugin) -> ServiceResult<ProcessEventsSummary> {
    let mut summary = ProcessEventsSummary::default();

    loop {
        let batch = db.pending_raw_events(tenant_id, &plugin.id, BATCH_SIZE)?;
        if batch.is_empty() {
            break;
        }

        for event in &batch {
            let outcome = to_request(plugin, event)
                .map_err(|msg| ServiceError::invalid("payload", msg))
                .and_then(|req| record_activity(db, tenant_id, req));

            match outcome {
                Ok(_) => {
                    db.mark_raw_event(&event.id, RawEventStatus::Processed, None)?;
                    summary.processed += 1;
                }
                Err(ServiceError::Database(e)) => return Err(ServiceError::Database(e)),
                Err(e) => {
                    log::debug!("[PLUGIN] Event {} from '{}' failed: {}", event.id, plugin.key, e);
                    db.mark_raw_event(&event.id, RawEventStatus::Failed, Some(&e.to_string()))?;
                    summary.failed += 1;
                }
            }
        }
    }

    if summary.processed + summary.failed > 0 {
        log::info!(
            "[PLUGIN] Processed events for '{}': {} ok, {} failed",
            plugin.key,
            summary.processed,
            summary.failed
        );
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ActivityFilter;
    use crate::models::plugin::IncomingPluginEvent;
    use crate::models::Page;
    use serde_json::json;

    fn event(event_type: &str, payload: Value) -> IncomingPluginEvent {
        IncomingPluginEvent {
            event_type: event_type.to_string(),
            payload,
        }
    }

    #[test]
    fn test_process_pending_events() {
        let db = Database::new(":memory:").unwrap();
        let (tenant, _) = db.create_tenant_with_admin("Acme", "a@acme.io", "Admin", "hash").unwrap();
        let plugin = db.install_plugin(&tenant.id, "github", "GitHub", "1.0.0", &json!({})).unwrap();

        db.insert_raw_events(
            &tenant.id,
            &plugin.id,
            &[
                event("star", json!({"identifier": {"kind": "github", "value": "Octocat"}})),
                event("fork", json!({"action": "repo_fork", "anon_id": "a1", "value": 2.5})),
                event("star", json!({"anon_id": "a2", "confidence": 3.0})),
                event("star", json!("not an object")),
            ],
        )
        .unwrap();

        let summary = process_pending(&db, &tenant.id, &plugin).unwrap();
        assert_eq!(summary, ProcessEventsSummary { processed: 2, failed: 2 });

        let (activities, total) = db
            .list_activities(&tenant.id, &ActivityFilter::default(), Page::default())
            .unwrap();
        assert_eq!(total, 2);
        assert!(activities.iter().all(|a| a.source == "plugin:github"));
        assert!(activities.iter().any(|a| a.action == "repo_fork"));

        let (failed, _) = db
            .list_raw_events(&tenant.id, &plugin.id, Some(RawEventStatus::Failed), Page::default())
            .unwrap();
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|e| e.error.is_some() && e.processed_at.is_some()));

        // Nothing left to do on a second pass
        let again = process_pending(&db, &tenant.id, &plugin).unwrap();
        assert_eq!(again, ProcessEventsSummary::default());
    }
}
