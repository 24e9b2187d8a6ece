//! Installed plugins, job runs and raw event database operations

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Result as SqliteResult, Row};
use serde_json::Value;
use uuid::Uuid;

use crate::db::{fmt_ts, json_col, now_ts, opt_ts_col, ts_col};
use crate::models::plugin::IncomingPluginEvent;
use crate::models::{Page, Plugin, PluginEventRaw, PluginRun, RawEventStatus, RunStatus};
use super::super::Database;

const PLUGIN_COLUMNS: &str = "id, tenant_id, key, name, version, enabled, config, created_at, updated_at";
const RUN_COLUMNS: &str =
    "id, plugin_id, job_name, status, started_at, finished_at, events_processed, duration_ms, error, metadata, created_at";
const EVENT_COLUMNS: &str = "id, plugin_id, event_type, payload, status, error, received_at, processed_at";

impl Database {
    // ============================================
    // Plugins
    // ============================================

    pub fn install_plugin(
        &self,
        tenant_id: &str,
        key: &str,
        name: &str,
        version: &str,
        config: &Value,
    ) -> SqliteResult<Plugin> {
        let id = Uuid::new_v4().to_string();
        {
            let conn = self.conn();
            let now = now_ts();
            conn.execute(
                "INSERT INTO plugins (id, tenant_id, key, name, version, enabled, config, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?7)",
                rusqlite::params![&id, tenant_id, key, name, version, config.to_string(), &now],
            )?;
        }
        self.get_plugin(tenant_id, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_plugin(&self, tenant_id: &str, id: &str) -> SqliteResult<Option<Plugin>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM plugins WHERE tenant_id = ?1 AND id = ?2", PLUGIN_COLUMNS),
            [tenant_id, id],
            Self::row_to_plugin,
        )
        .optional()
    }

    pub fn get_plugin_by_key(&self, tenant_id: &str, key: &str) -> SqliteResult<Option<Plugin>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM plugins WHERE tenant_id = ?1 AND key = ?2", PLUGIN_COLUMNS),
            [tenant_id, key],
            Self::row_to_plugin,
        )
        .optional()
    }

    pub fn list_plugins(&self, tenant_id: &str) -> SqliteResult<Vec<Plugin>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM plugins WHERE tenant_id = ?1 ORDER BY key",
            PLUGIN_COLUMNS
        ))?;
        let plugins = stmt
            .query_map([tenant_id], Self::row_to_plugin)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(plugins)
    }

    pub fn update_plugin(
        &self,
        tenant_id: &str,
        id: &str,
        enabled: Option<bool>,
        config: Option<&Value>,
    ) -> SqliteResult<Option<Plugin>> {
        let rows = {
            let conn = self.conn();
            conn.execute(
                "UPDATE plugins SET enabled = COALESCE(?1, enabled), config = COALESCE(?2, config), updated_at = ?3
                 WHERE tenant_id = ?4 AND id = ?5",
                rusqlite::params![enabled, config.map(|c| c.to_string()), now_ts(), tenant_id, id],
            )?
        };
        if rows == 0 {
            return Ok(None);
        }
        self.get_plugin(tenant_id, id)
    }

    /// Runs and raw events cascade with the plugin
    pub fn delete_plugin(&self, tenant_id: &str, id: &str) -> SqliteResult<bool> {
        let conn = self.conn();
        let rows = conn.execute("DELETE FROM plugins WHERE tenant_id = ?1 AND id = ?2", [tenant_id, id])?;
        Ok(rows > 0)
    }

    // ============================================
    // Runs
    // ============================================

    pub fn create_run(&self, tenant_id: &str, plugin_id: &str, job_name: &str, metadata: &Value) -> SqliteResult<PluginRun> {
        let id = Uuid::new_v4().to_string();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO plugin_runs (id, tenant_id, plugin_id, job_name, status, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                &id,
                tenant_id,
                plugin_id,
                job_name,
                RunStatus::Pending.as_ref(),
                metadata.to_string(),
                now_ts(),
            ],
        )?;
        conn.query_row(
            &format!("SELECT {} FROM plugin_runs WHERE id = ?1", RUN_COLUMNS),
            [&id],
            Self::row_to_run,
        )
    }

    pub fn mark_run_running(&self, run_id: &str, started_at: DateTime<Utc>) -> SqliteResult<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE plugin_runs SET status = ?1, started_at = ?2 WHERE id = ?3",
            rusqlite::params![RunStatus::Running.as_ref(), fmt_ts(&started_at), run_id],
        )?;
        Ok(())
    }

    pub fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        events_processed: i64,
        duration_ms: i64,
        error: Option<&str>,
        metadata: &Value,
    ) -> SqliteResult<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE plugin_runs SET status = ?1, finished_at = ?2, events_processed = ?3, duration_ms = ?4,
                    error = ?5, metadata = ?6
             WHERE id = ?7",
            rusqlite::params![
                status.as_ref(),
                now_ts(),
                events_processed,
                duration_ms,
                error,
                metadata.to_string(),
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn get_run(&self, tenant_id: &str, run_id: &str) -> SqliteResult<Option<PluginRun>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM plugin_runs WHERE tenant_id = ?1 AND id = ?2", RUN_COLUMNS),
            [tenant_id, run_id],
            Self::row_to_run,
        )
        .optional()
    }

    pub fn list_runs(&self, tenant_id: &str, plugin_id: &str, page: Page) -> SqliteResult<(Vec<PluginRun>, i64)> {
        let conn = self.conn();
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM plugin_runs WHERE tenant_id = ?1 AND plugin_id = ?2",
            [tenant_id, plugin_id],
            |row| row.get(0),
        )?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM plugin_runs WHERE tenant_id = ?1 AND plugin_id = ?2
             ORDER BY created_at DESC, id LIMIT ?3 OFFSET ?4",
            RUN_COLUMNS
        ))?;
        let runs = stmt
            .query_map(
                rusqlite::params![tenant_id, plugin_id, page.limit(), page.offset()],
                Self::row_to_run,
            )?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok((runs, total))
    }

    /// Cursor recorded by the most recent successful run of a job
    pub fn last_successful_cursor(&self, tenant_id: &str, plugin_id: &str, job_name: &str) -> SqliteResult<Option<Value>> {
        let conn = self.conn();
        let metadata: Option<String> = conn
            .query_row(
                "SELECT metadata FROM plugin_runs
                 WHERE tenant_id = ?1 AND plugin_id = ?2 AND job_name = ?3 AND status = 'success'
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                [tenant_id, plugin_id, job_name],
                |row| row.get(0),
            )
            .optional()?;

        Ok(metadata
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
            .and_then(|meta| meta.get("cursor").cloned())
            .filter(|cursor| !cursor.is_null()))
    }

    // ============================================
    // Raw events
    // ============================================

    /// Store a batch as `pending`; all or nothing
    pub fn insert_raw_events(
        &self,
        tenant_id: &str,
        plugin_id: &str,
        events: &[IncomingPluginEvent],
    ) -> SqliteResult<Vec<String>> {
        self.transaction(|tx| {
            let mut stmt = tx.prepare(
                "INSERT INTO plugin_events_raw (id, tenant_id, plugin_id, event_type, payload, status, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
            )?;
            let now = now_ts();
            let mut ids = Vec::with_capacity(events.len());
            for event in events {
                let id = Uuid::new_v4().to_string();
                stmt.execute(rusqlite::params![
                    &id,
                    tenant_id,
                    plugin_id,
                    event.event_type.trim(),
                    event.payload.to_string(),
                    &now,
                ])?;
                ids.push(id);
            }
            Ok(ids)
        })
    }

    pub fn list_raw_events(
        &self,
        tenant_id: &str,
        plugin_id: &str,
        status: Option<RawEventStatus>,
        page: Page,
    ) -> SqliteResult<(Vec<PluginEventRaw>, i64)> {
        let status = status.map(|s| s.as_ref().to_string());
        let conn = self.conn();
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM plugin_events_raw WHERE tenant_id = ?1 AND plugin_id = ?2 AND (?3 IS NULL OR status = ?3)",
            rusqlite::params![tenant_id, plugin_id, status],
            |row| row.get(0),
        )?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM plugin_events_raw WHERE tenant_id = ?1 AND plugin_id = ?2 AND (?3 IS NULL OR status = ?3)
             ORDER BY received_at DESC, id LIMIT ?4 OFFSET ?5",
            EVENT_COLUMNS
        ))?;
        let events = stmt
            .query_map(
                rusqlite::params![tenant_id, plugin_id, status, page.limit(), page.offset()],
                Self::row_to_event,
            )?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok((events, total))
    }

    /// Oldest pending events first
    pub fn pending_raw_events(&self, tenant_id: &str, plugin_id: &str, limit: i64) -> SqliteResult<Vec<PluginEventRaw>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM plugin_events_raw WHERE tenant_id = ?1 AND plugin_id = ?2 AND status = 'pending'
             ORDER BY received_at, rowid LIMIT ?3",
            EVENT_COLUMNS
        ))?;
        let events = stmt
            .query_map(rusqlite::params![tenant_id, plugin_id, limit], Self::row_to_event)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(events)
    }

    pub fn mark_raw_event(&self, event_id: &str, status: RawEventStatus, error: Option<&str>) -> SqliteResult<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE plugin_events_raw SET status = ?1, error = ?2, processed_at = ?3 WHERE id = ?4",
            rusqlite::params![status.as_ref(), error, now_ts(), event_id],
        )?;
        Ok(())
    }

    fn row_to_plugin(row: &Row<'_>) -> SqliteResult<Plugin> {
        Ok(Plugin {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            key: row.get(2)?,
            name: row.get(3)?,
            version: row.get(4)?,
            enabled: row.get::<_, i64>(5)? != 0,
            config: json_col(row, 6)?,
            created_at: ts_col(row, 7)?,
            updated_at: ts_col(row, 8)?,
        })
    }

    fn row_to_run(row: &Row<'_>) -> SqliteResult<PluginRun> {
        Ok(PluginRun {
            id: row.get(0)?,
            plugin_id: row.get(1)?,
            job_name: row.get(2)?,
            status: row.get::<_, String>(3)?.parse().unwrap_or(RunStatus::Failed),
            started_at: opt_ts_col(row, 4)?,
            finished_at: opt_ts_col(row, 5)?,
            events_processed: row.get(6)?,
            duration_ms: row.get(7)?,
            error: row.get(8)?,
            metadata: json_col(row, 9)?,
            created_at: ts_col(row, 10)?,
        })
    }

    fn row_to_event(row: &Row<'_>) -> SqliteResult<PluginEventRaw> {
        Ok(PluginEventRaw {
            id: row.get(0)?,
            plugin_id: row.get(1)?,
            event_type: row.get(2)?,
            payload: json_col(row, 3)?,
            status: row.get::<_, String>(4)?.parse().unwrap_or(RawEventStatus::Failed),
            error: row.get(5)?,
            received_at: ts_col(row, 6)?,
            processed_at: opt_ts_col(row, 7)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> (Database, String, Plugin) {
        let db = Database::new(":memory:").unwrap();
        let (tenant, _) = db.create_tenant_with_admin("Acme", "a@acme.dev", "A", "h").unwrap();
        let plugin = db
            .install_plugin(&tenant.id, "github", "GitHub", "1.0.0", &json!({"org": "acme"}))
            .unwrap();
        (db, tenant.id, plugin)
    }

    #[test]
    fn test_install_is_unique_per_tenant() {
        let (db, tenant, plugin) = setup();
        assert!(plugin.enabled);
        assert_eq!(plugin.config["org"], "acme");
        let err = db.install_plugin(&tenant, "github", "GitHub", "1.0.0", &json!({})).unwrap_err();
        assert!(crate::errors::is_unique_violation(&err));
    }

    #[test]
    fn test_update_keeps_unspecified_fields() {
        let (db, tenant, plugin) = setup();
        let updated = db.update_plugin(&tenant, &plugin.id, Some(false), None).unwrap().unwrap();
        assert!(!updated.enabled);
        assert_eq!(updated.config["org"], "acme");
    }

    #[test]
    fn test_run_lifecycle_and_cursor() {
        let (db, tenant, plugin) = setup();
        assert!(db.last_successful_cursor(&tenant, &plugin.id, "sync").unwrap().is_none());

        let run = db.create_run(&tenant, &plugin.id, "sync", &json!({})).unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        db.mark_run_running(&run.id, Utc::now()).unwrap();
        db.finish_run(&run.id, RunStatus::Success, 10, 25, None, &json!({"cursor": "page-2"}))
            .unwrap();

        let failed = db.create_run(&tenant, &plugin.id, "sync", &json!({})).unwrap();
        db.finish_run(&failed.id, RunStatus::Failed, 0, 5, Some("boom"), &json!({"cursor": "page-9"}))
            .unwrap();

        assert_eq!(
            db.last_successful_cursor(&tenant, &plugin.id, "sync").unwrap(),
            Some(json!("page-2"))
        );
        let fetched = db.get_run(&tenant, &run.id).unwrap().unwrap();
        assert_eq!(fetched.events_processed, 10);
        assert!(fetched.started_at.is_some());
        assert_eq!(db.list_runs(&tenant, &plugin.id, Page::default()).unwrap().1, 2);
    }

    #[test]
    fn test_raw_events_flow() {
        let (db, tenant, plugin) = setup();
        let events = vec![
            IncomingPluginEvent {
                event_type: "star".to_string(),
                payload: json!({"login": "ada"}),
            },
            IncomingPluginEvent {
                event_type: "fork".to_string(),
                payload: json!({"login": "bob"}),
            },
        ];
        let ids = db.insert_raw_events(&tenant, &plugin.id, &events).unwrap();
        assert_eq!(ids.len(), 2);

        let pending = db.pending_raw_events(&tenant, &plugin.id, 100).unwrap();
        assert_eq!(pending.len(), 2);
        db.mark_raw_event(&pending[0].id, RawEventStatus::Processed, None).unwrap();

        let (remaining, total) = db
            .list_raw_events(&tenant, &plugin.id, Some(RawEventStatus::Pending), Page::default())
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(remaining[0].status, RawEventStatus::Pending);
    }

    #[test]
    fn test_delete_cascades_runs() {
        let (db, tenant, plugin) = setup();
        let run = db.create_run(&tenant, &plugin.id, "sync", &json!({})).unwrap();
        assert!(db.delete_plugin(&tenant, &plugin.id).unwrap());
        assert!(db.get_run(&tenant, &run.id).unwrap().is_none());
    }
}
