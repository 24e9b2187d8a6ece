//! Runs plugin jobs: timeout per attempt, bounded retries, cursor hand-off
//!
//! Every run is recorded in `plugin_runs` and moves through
//! `pending -> running -> success | failed`. Invocation failures end up in the
//! run record; they are never returned as errors to the caller.

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Instant;

use super::invoker::{JobInvocation, JobInvoker, JobOutput};
use super::loader::PluginCatalog;
use super::manifest::JobDef;
use crate::db::Database;
use crate::errors::{ServiceError, ServiceResult};
use crate::models::{Plugin, RunStatus};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobResult {
    pub run_id: String,
    pub status: RunStatus,
    pub events_processed: i64,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub metadata: Value,
}

/// A run that has been validated and recorded as `pending` but not started
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub run_id: String,
    tenant_id: String,
    plugin: Plugin,
    endpoint: Option<String>,
    job: JobDef,
    cursor: Option<Value>,
}

pub struct JobExecutor {
    db: Arc<Database>,
    catalog: Arc<PluginCatalog>,
    invoker: Arc<dyn JobInvoker>,
}

impl JobExecutor {
    pub fn new(db: Arc<Database>, catalog: Arc<PluginCatalog>, invoker: Arc<dyn JobInvoker>) -> Self {
        Self { db, catalog, invoker }
    }

    /// Validate and execute in one go
    pub async fn run(
        &self,
        tenant_id: &str,
        plugin_id: &str,
        job_name: &str,
        cursor: Option<Value>,
    ) -> ServiceResult<JobResult> {
        let prepared = self.prepare(tenant_id, plugin_id, job_name, cursor).await?;
        Ok(self.execute(prepared).await)
    }

    /// Check the plugin and job, resolve the cursor and record a pending run.
    /// Errors here mean no run was created.
    pub async fn prepare(
        &self,
        tenant_id: &str,
        plugin_id: &str,
        job_name: &str,
        cursor: Option<Value>,
    ) -> ServiceResult<PreparedRun> {
        let plugin = self
            .db
            .get_plugin(tenant_id, plugin_id)?
            .ok_or_else(|| ServiceError::not_found("Plugin"))?;
        if !plugin.enabled {
            return Err(ServiceError::Conflict(format!("Plugin '{}' is disabled", plugin.key)));
        }

        let manifest = self.catalog.load(&plugin.key).await?;
        let job = manifest
            .job(job_name)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("Job '{}' not found in plugin '{}'", job_name, plugin.key)))?;

        let cursor = match cursor.filter(|c| !c.is_null()) {
            Some(c) => Some(c),
            None => self.db.last_successful_cursor(tenant_id, &plugin.id, job_name)?,
        };

        let run = self.db.create_run(
            tenant_id,
            &plugin.id,
            job_name,
            &json!({ "cursor": cursor, "retry_count": 0 }),
        )?;

        Ok(PreparedRun {
            run_id: run.id,
            tenant_id: tenant_id.to_string(),
            endpoint: manifest.endpoint.clone(),
            plugin,
            job,
            cursor,
        })
    }

    /// Drive a prepared run to completion
    pub async fn execute(&self, prepared: PreparedRun) -> JobResult {
        let PreparedRun {
            run_id,
            tenant_id,
            plugin,
            endpoint,
            job,
            cursor,
        } = prepared;

        let started = Instant::now();
        if let Err(e) = self.db.mark_run_running(&run_id, chrono::Utc::now()) {
            log::error!("[PLUGIN] Failed to mark run {} running: {}", run_id, e);
        }

        let invocation = JobInvocation {
            tenant_id,
            plugin_key: plugin.key.clone(),
            job: job.name.clone(),
            endpoint,
            route: job.route.clone(),
            cursor: cursor.clone(),
        };

        let max_attempts = job.retry.max_attempts.max(1);
        let mut attempt = 0u32;
        let outcome = loop {
            attempt += 1;
            let result = match tokio::time::timeout(job.timeout(), self.invoker.invoke(&invocation)).await {
                Ok(result) => result,
                Err(_) => Err(format!("job timed out after {}s", job.timeout_sec)),
            };

            match result {
                Ok(output) => break Ok(output),
                Err(e) if attempt < max_attempts => {
                    let delay = job.retry.backoff_for(attempt);
                    log::warn!(
                        "[PLUGIN] {}/{} attempt {}/{} failed: {} (retrying in {:?})",
                        plugin.key,
                        job.name,
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break Err(e),
            }
        };

        let duration_ms = started.elapsed().as_millis() as i64;
        let retry_count = attempt - 1;

        let (status, events_processed, error, next_cursor) = match outcome {
            Ok(JobOutput {
                events_processed,
                next_cursor,
            }) => (
                RunStatus::Success,
                events_processed,
                None,
                next_cursor.or(cursor),
            ),
            Err(e) => (RunStatus::Failed, 0, Some(e), cursor),
        };
        let metadata = json!({ "cursor": next_cursor, "retry_count": retry_count });

        if let Err(e) = self.db.finish_run(
            &run_id,
            status,
            events_processed,
            duration_ms,
            error.as_deref(),
            &metadata,
        ) {
            log::error!("[PLUGIN] Failed to record run {}: {}", run_id, e);
        }

        match &error {
            None => log::info!(
                "[PLUGIN] {}/{} succeeded: {} events in {}ms",
                plugin.key,
                job.name,
                events_processed,
                duration_ms
            ),
            Some(e) => log::warn!("[PLUGIN] {}/{} failed after {} attempt(s): {}", plugin.key, job.name, attempt, e),
        }

        JobResult {
            run_id,
            status,
            events_processed,
            duration_ms,
            error,
            metadata,
        }
    }
}
