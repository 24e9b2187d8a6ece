//! Activity log and funnel stage mapping database operations

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Result as SqliteResult, Row, ToSql};
use std::collections::HashMap;
use uuid::Uuid;

use crate::db::{fmt_ts, json_col, now_ts, ts_col};
use crate::models::activity::{CreateActivityRequest, UpdateActivityRequest};
use crate::models::funnel::{normalize_action, StageMapping};
use crate::models::{Activity, FunnelStage, Page, StageResolver};
use super::developers::resolve_identifiers;
use super::super::Database;

const ACTIVITY_COLUMNS: &str = "a.id, a.developer_id, a.account_id, a.anon_id, a.action, a.source, a.occurred_at,
    a.value, a.confidence, a.metadata, a.dedup_key, a.created_at,
    (SELECT GROUP_CONCAT(ac.campaign_id) FROM activity_campaigns ac WHERE ac.activity_id = a.id)";

/// Filters shared by the activity list and the analytics queries
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub developer_id: Option<String>,
    pub action: Option<String>,
    pub source: Option<String>,
    pub campaign_id: Option<String>,
    /// Restrict to these actions (a stage filter resolved to actions)
    pub actions: Option<Vec<String>>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl ActivityFilter {
    /// WHERE clause over alias `a`, with its positional parameters
    pub(crate) fn to_sql(&self, tenant_id: &str) -> (String, Vec<Box<dyn ToSql>>) {
        let mut clauses = vec!["a.tenant_id = ?".to_string()];
        let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(tenant_id.to_string())];

        if let Some(developer_id) = &self.developer_id {
            clauses.push("a.developer_id = ?".to_string());
            params.push(Box::new(developer_id.clone()));
        }
        if let Some(action) = &self.action {
            clauses.push("a.action = ?".to_string());
            params.push(Box::new(normalize_action(action)));
        }
        if let Some(source) = &self.source {
            clauses.push("a.source = ?".to_string());
            params.push(Box::new(source.clone()));
        }
        if let Some(campaign_id) = &self.campaign_id {
            clauses.push(
                "EXISTS (SELECT 1 FROM activity_campaigns ac WHERE ac.activity_id = a.id AND ac.campaign_id = ?)"
                    .to_string(),
            );
            params.push(Box::new(campaign_id.clone()));
        }
        if let Some(actions) = &self.actions {
            if actions.is_empty() {
                clauses.push("0".to_string());
            } else {
                let marks = vec!["?"; actions.len()].join(", ");
                clauses.push(format!("a.action IN ({})", marks));
                for action in actions {
                    params.push(Box::new(action.clone()));
                }
            }
        }
        if let Some(from) = &self.from {
            clauses.push("a.occurred_at >= ?".to_string());
            params.push(Box::new(fmt_ts(from)));
        }
        if let Some(to) = &self.to {
            clauses.push("a.occurred_at <= ?".to_string());
            params.push(Box::new(fmt_ts(to)));
        }

        (clauses.join(" AND "), params)
    }
}

impl Database {
    /// Record an activity. `req.identifier` must already be normalized.
    /// Identifier resolution, the insert and the campaign links share one
    /// transaction. A repeated `dedup_key` fails with a
    /// unique violation and leaves nothing behind.
    pub fn create_activity(&self, tenant_id: &str, req: &CreateActivityRequest) -> SqliteResult<Activity> {
        let id = Uuid::new_v4().to_string();
        let occurred_at = req.occurred_at.unwrap_or_else(Utc::now);
        let metadata = req
            .metadata
            .clone()
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));

        self.transaction(|tx| {
            let mut developer_id = req.developer_id.clone();
            if developer_id.is_none() {
                if let Some(identifier) = &req.identifier {
                    let resolution = resolve_identifiers(tx, tenant_id, std::slice::from_ref(identifier), None)?;
                    developer_id = Some(resolution.developer_id);
                }
            }

            tx.execute(
                "INSERT INTO activities (id, tenant_id, developer_id, account_id, anon_id, action, source, occurred_at,
                                         value, confidence, metadata, dedup_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                rusqlite::params![
                    &id,
                    tenant_id,
                    developer_id,
                    req.account_id,
                    req.anon_id,
                    normalize_action(&req.action),
                    req.source.trim(),
                    fmt_ts(&occurred_at),
                    req.value,
                    req.confidence,
                    metadata.to_string(),
                    req.dedup_key.as_deref().map(str::trim),
                    now_ts(),
                ],
            )?;

            let mut link = tx.prepare(
                "INSERT OR IGNORE INTO activity_campaigns (activity_id, campaign_id, tenant_id) VALUES (?1, ?2, ?3)",
            )?;
            for campaign_id in &req.campaign_ids {
                link.execute([id.as_str(), campaign_id.as_str(), tenant_id])?;
            }
            Ok::<_, rusqlite::Error>(())
        })?;

        self.get_activity(tenant_id, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_activity(&self, tenant_id: &str, id: &str) -> SqliteResult<Option<Activity>> {
        let resolver = self.stage_resolver(tenant_id)?;
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM activities a WHERE a.tenant_id = ?1 AND a.id = ?2", ACTIVITY_COLUMNS),
            [tenant_id, id],
            |row| Self::row_to_activity(row, &resolver),
        )
        .optional()
    }

    /// Newest first
    pub fn list_activities(
        &self,
        tenant_id: &str,
        filter: &ActivityFilter,
        page: Page,
    ) -> SqliteResult<(Vec<Activity>, i64)> {
        let resolver = self.stage_resolver(tenant_id)?;
        let (where_sql, mut params) = filter.to_sql(tenant_id);

        let conn = self.conn();
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM activities a WHERE {}", where_sql),
            rusqlite::params_from_iter(params.iter()),
            |row| row.get(0),
        )?;

        params.push(Box::new(page.limit()));
        params.push(Box::new(page.offset()));
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM activities a WHERE {} ORDER BY a.occurred_at DESC, a.id LIMIT ? OFFSET ?",
            ACTIVITY_COLUMNS, where_sql
        ))?;
        let activities = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                Self::row_to_activity(row, &resolver)
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok((activities, total))
    }

    /// Annotation-only update; action, actor and time are immutable
    pub fn update_activity(
        &self,
        tenant_id: &str,
        id: &str,
        req: &UpdateActivityRequest,
    ) -> SqliteResult<Option<Activity>> {
        let rows = {
            let conn = self.conn();
            conn.execute(
                "UPDATE activities SET value = COALESCE(?1, value), confidence = COALESCE(?2, confidence),
                        metadata = COALESCE(?3, metadata)
                 WHERE tenant_id = ?4 AND id = ?5",
                rusqlite::params![
                    req.value,
                    req.confidence,
                    req.metadata.as_ref().map(|m| m.to_string()),
                    tenant_id,
                    id,
                ],
            )?
        };
        if rows == 0 {
            return Ok(None);
        }
        self.get_activity(tenant_id, id)
    }

    pub fn delete_activity(&self, tenant_id: &str, id: &str) -> SqliteResult<bool> {
        let conn = self.conn();
        let rows = conn.execute("DELETE FROM activities WHERE tenant_id = ?1 AND id = ?2", [tenant_id, id])?;
        Ok(rows > 0)
    }

    /// Every action the tenant has recorded, for resolving stage filters
    pub fn distinct_actions(&self, tenant_id: &str) -> SqliteResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT DISTINCT action FROM activities WHERE tenant_id = ?1 ORDER BY action")?;
        let actions = stmt
            .query_map([tenant_id], |row| row.get(0))?
            .collect::<SqliteResult<Vec<String>>>()?;
        Ok(actions)
    }

    pub fn list_stage_overrides(&self, tenant_id: &str) -> SqliteResult<Vec<StageMapping>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT action, stage FROM funnel_stage_mappings WHERE tenant_id = ?1 ORDER BY action",
        )?;
        let rows = stmt
            .query_map([tenant_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(action, stage)| {
                stage.parse::<FunnelStage>().ok().map(|stage| StageMapping { action, stage })
            })
            .collect())
    }

    /// Replace the tenant's overrides wholesale
    pub fn replace_stage_overrides(&self, tenant_id: &str, mappings: &[StageMapping]) -> SqliteResult<()> {
        self.transaction(|tx| {
            tx.execute("DELETE FROM funnel_stage_mappings WHERE tenant_id = ?1", [tenant_id])?;
            let mut insert = tx.prepare(
                "INSERT OR REPLACE INTO funnel_stage_mappings (tenant_id, action, stage) VALUES (?1, ?2, ?3)",
            )?;
            for mapping in mappings {
                insert.execute([tenant_id, normalize_action(&mapping.action).as_str(), mapping.stage.as_ref()])?;
            }
            Ok(())
        })
    }

    pub fn stage_resolver(&self, tenant_id: &str) -> SqliteResult<StageResolver> {
        let overrides: HashMap<String, FunnelStage> = self
            .list_stage_overrides(tenant_id)?
            .into_iter()
            .map(|m| (m.action, m.stage))
            .collect();
        Ok(StageResolver::new(overrides))
    }

    fn row_to_activity(row: &Row<'_>, resolver: &StageResolver) -> SqliteResult<Activity> {
        let action: String = row.get(4)?;
        let campaign_ids = row
            .get::<_, Option<String>>(12)?
            .map(|joined| joined.split(',').map(str::to_string).collect())
            .unwrap_or_default();
        Ok(Activity {
            id: row.get(0)?,
            developer_id: row.get(1)?,
            account_id: row.get(2)?,
            anon_id: row.get(3)?,
            stage: resolver.stage_for(&action),
            action,
            source: row.get(5)?,
            occurred_at: ts_col(row, 6)?,
            value: row.get(7)?,
            confidence: row.get(8)?,
            metadata: json_col(row, 9)?,
            dedup_key: row.get(10)?,
            created_at: ts_col(row, 11)?,
            campaign_ids,
        })
    }
}
