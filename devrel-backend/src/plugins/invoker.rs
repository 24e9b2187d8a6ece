//! How a plugin job is actually called

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything a job invocation needs, independent of transport
#[derive(Debug, Clone, PartialEq)]
pub struct JobInvocation {
    pub tenant_id: String,
    pub plugin_key: String,
    pub job: String,
    pub endpoint: Option<String>,
    pub route: String,
    pub cursor: Option<Value>,
}

/// What the plugin reports back
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JobOutput {
    #[serde(default)]
    pub events_processed: i64,
    #[serde(default)]
    pub next_cursor: Option<Value>,
}

#[async_trait]
pub trait JobInvoker: Send + Sync {
    /// Run one attempt. Timeouts are enforced by the caller.
    async fn invoke(&self, invocation: &JobInvocation) -> Result<JobOutput, String>;
}

#[derive(Serialize)]
struct JobPayload<'a> {
    tenant_id: &'a str,
    plugin_key: &'a str,
    job: &'a str,
    cursor: &'a Option<Value>,
}

/// POSTs `{tenant_id, plugin_key, job, cursor}` to `<endpoint><route>`
pub struct HttpJobInvoker {
    client: Client,
}

impl HttpJobInvoker {
    pub fn new() -> Result<Self, String> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let client = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("devrel-backend/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;
        Ok(Self { client })
    }
}

pub fn job_url(endpoint: &str, route: &str) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), route.trim_start_matches('/'))
}

#[async_trait]
impl JobInvoker for HttpJobInvoker {
    async fn invoke(&self, invocation: &JobInvocation) -> Result<JobOutput, String> {
        let endpoint = invocation
            .endpoint
            .as_deref()
            .ok_or_else(|| format!("plugin '{}' declares no endpoint", invocation.plugin_key))?;
        let url = job_url(endpoint, &invocation.route);

        log::debug!("[PLUGIN] POST {} (job '{}')", url, invocation.job);

        let response = self
            .client
            .post(&url)
            .json(&JobPayload {
                tenant_id: &invocation.tenant_id,
                plugin_key: &invocation.plugin_key,
                job: &invocation.job,
                cursor: &invocation.cursor,
            })
            .send()
            .await
            .map_err(|e| format!("request to {} failed: {}", url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(format!("plugin responded with {}: {}", status, snippet));
        }

        response
            .json::<JobOutput>()
            .await
            .map_err(|e| format!("invalid job response: {}", e))
    }
}
