use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumString};

use crate::plugins::manifest::PluginManifest;

/// A plugin installed for a tenant
#[derive(Debug, Clone, Serialize)]
pub struct Plugin {
    pub id: String,
    pub tenant_id: String,
    pub key: String,
    pub name: String,
    pub version: String,
    pub enabled: bool,
    /// Config as stored; secret fields hold ciphertext and are masked before leaving the API
    pub config: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PluginDetail {
    #[serde(flatten)]
    pub plugin: Plugin,
    pub manifest: Option<PluginManifest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallPluginRequest {
    pub key: String,
    pub config: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePluginRequest {
    pub enabled: Option<bool>,
    pub config: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
}

/// One execution of a plugin job (the execution log)
#[derive(Debug, Clone, Serialize)]
pub struct PluginRun {
    pub id: String,
    pub plugin_id: String,
    pub job_name: String,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub events_processed: i64,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RawEventStatus {
    Pending,
    Processed,
    Failed,
}

/// External event as received from a plugin, before it becomes an activity
#[derive(Debug, Clone, Serialize)]
pub struct PluginEventRaw {
    pub id: String,
    pub plugin_id: String,
    pub event_type: String,
    pub payload: Value,
    pub status: RawEventStatus,
    pub error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingPluginEvent {
    pub event_type: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestEventsRequest {
    pub events: Vec<IncomingPluginEvent>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EventListQuery {
    pub status: Option<RawEventStatus>,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct ProcessEventsSummary {
    pub processed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RunJobRequest {
    pub cursor: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RunJobQuery {
    #[serde(default, rename = "async")]
    pub run_async: bool,
}
