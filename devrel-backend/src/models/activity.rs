use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ServiceResult, Validator};
use crate::models::developer::IdentifierInput;
use crate::models::funnel::FunnelStage;

pub const MAX_CAMPAIGNS_PER_ACTIVITY: usize = 20;

/// Immutable event log entry
#[derive(Debug, Clone, Serialize)]
pub struct Activity {
    pub id: String,
    pub developer_id: Option<String>,
    pub account_id: Option<String>,
    pub anon_id: Option<String>,
    pub action: String,
    pub stage: Option<FunnelStage>,
    pub source: String,
    pub occurred_at: DateTime<Utc>,
    pub value: Option<f64>,
    pub confidence: Option<f64>,
    pub metadata: Value,
    pub campaign_ids: Vec<String>,
    pub dedup_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CreateActivityRequest {
    pub action: String,
    pub source: String,
    pub occurred_at: Option<DateTime<Utc>>,
    pub developer_id: Option<String>,
    pub account_id: Option<String>,
    pub anon_id: Option<String>,
    pub identifier: Option<IdentifierInput>,
    pub value: Option<f64>,
    pub confidence: Option<f64>,
    pub metadata: Option<Value>,
    #[serde(default)]
    pub campaign_ids: Vec<String>,
    pub dedup_key: Option<String>,
}

impl CreateActivityRequest {
    pub fn validate(&self) -> ServiceResult<()> {
        let mut v = Validator::new();
        v.check(!self.action.trim().is_empty(), "action", "is required");
        v.check(!self.source.trim().is_empty(), "source", "is required");
        v.check(
            self.developer_id.is_some()
                || self.account_id.is_some()
                || self.anon_id.is_some()
                || self.identifier.is_some(),
            "developer_id",
            "one of developer_id, account_id, anon_id or identifier is required",
        );
        if let Some(value) = self.value {
            v.check(value.is_finite(), "value", "must be a finite number");
        }
        check_confidence(&mut v, self.confidence);
        check_metadata(&mut v, self.metadata.as_ref());
        v.check(
            self.campaign_ids.len() <= MAX_CAMPAIGNS_PER_ACTIVITY,
            "campaign_ids",
            "too many campaigns",
        );
        if let Some(key) = &self.dedup_key {
            v.check(!key.trim().is_empty(), "dedup_key", "must not be blank");
        }
        if let Some(identifier) = &self.identifier {
            if let Err(msg) = identifier.normalized() {
                v.push("identifier", msg);
            }
        }
        v.finish()
    }
}

/// Only annotations may change after the fact
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateActivityRequest {
    pub value: Option<f64>,
    pub confidence: Option<f64>,
    pub metadata: Option<Value>,
}

impl UpdateActivityRequest {
    pub fn validate(&self) -> ServiceResult<()> {
        let mut v = Validator::new();
        if let Some(value) = self.value {
            v.check(value.is_finite(), "value", "must be a finite number");
        }
        check_confidence(&mut v, self.confidence);
        check_metadata(&mut v, self.metadata.as_ref());
        v.finish()
    }
}

fn check_confidence(v: &mut Validator, confidence: Option<f64>) {
    if let Some(c) = confidence {
        v.check((0.0..=1.0).contains(&c), "confidence", "must be between 0 and 1");
    }
}

fn check_metadata(v: &mut Validator, metadata: Option<&Value>) {
    if let Some(m) = metadata {
        v.check(m.is_object(), "metadata", "must be a JSON object");
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ActivityListQuery {
    pub developer_id: Option<String>,
    pub action: Option<String>,
    pub source: Option<String>,
    pub campaign_id: Option<String>,
    pub stage: Option<FunnelStage>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}
