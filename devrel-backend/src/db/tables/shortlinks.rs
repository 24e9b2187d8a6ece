//! Shortlink database operations
//!
//! Click counts are not stored; they are the number of `shortlink`-sourced
//! activities whose metadata points at the link.

use rusqlite::{OptionalExtension, Result as SqliteResult, Row};
use uuid::Uuid;

use crate::db::{now_ts, ts_col};
use crate::models::shortlink::{UpdateShortlinkRequest, SHORTLINK_SOURCE};
use crate::models::{Page, Shortlink};
use super::super::Database;

fn select_sql(where_sql: &str) -> String {
    format!(
        "SELECT s.id, s.key, s.target_url, s.title, s.campaign_id, s.created_at, s.updated_at,
                (SELECT COUNT(*) FROM activities a
                 WHERE a.tenant_id = s.tenant_id AND a.source = '{}'
                   AND json_extract(a.metadata, '$.shortlink_id') = s.id),
                s.tenant_id
         FROM shortlinks s WHERE {}",
        SHORTLINK_SOURCE, where_sql
    )
}

impl Database {
    pub fn create_shortlink(
        &self,
        tenant_id: &str,
        key: &str,
        target_url: &str,
        title: Option<&str>,
        campaign_id: Option<&str>,
    ) -> SqliteResult<Shortlink> {
        let id = Uuid::new_v4().to_string();
        {
            let conn = self.conn();
            let now = now_ts();
            conn.execute(
                "INSERT INTO shortlinks (id, tenant_id, key, target_url, title, campaign_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                rusqlite::params![&id, tenant_id, key, target_url.trim(), title, campaign_id, &now],
            )?;
        }
        self.get_shortlink(tenant_id, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_shortlink(&self, tenant_id: &str, id: &str) -> SqliteResult<Option<Shortlink>> {
        let conn = self.conn();
        conn.query_row(&select_sql("s.tenant_id = ?1 AND s.id = ?2"), [tenant_id, id], Self::row_to_shortlink)
            .optional()
    }

    /// Public lookup for the redirect; keys are globally unique.
    /// Returns the owning tenant alongside the link.
    pub fn get_shortlink_by_key(&self, key: &str) -> SqliteResult<Option<(String, Shortlink)>> {
        let conn = self.conn();
        conn.query_row(&select_sql("s.key = ?1"), [key], |row| {
            Ok((row.get(8)?, Self::row_to_shortlink(row)?))
        })
        .optional()
    }

    pub fn list_shortlinks(&self, tenant_id: &str, page: Page) -> SqliteResult<(Vec<Shortlink>, i64)> {
        let conn = self.conn();
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM shortlinks WHERE tenant_id = ?1",
            [tenant_id],
            |row| row.get(0),
        )?;
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY s.created_at DESC, s.id LIMIT ?2 OFFSET ?3",
            select_sql("s.tenant_id = ?1")
        ))?;
        let links = stmt
            .query_map(
                rusqlite::params![tenant_id, page.limit(), page.offset()],
                Self::row_to_shortlink,
            )?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok((links, total))
    }

    pub fn update_shortlink(
        &self,
        tenant_id: &str,
        id: &str,
        req: &UpdateShortlinkRequest,
    ) -> SqliteResult<Option<Shortlink>> {
        let rows = {
            let conn = self.conn();
            conn.execute(
                "UPDATE shortlinks SET target_url = COALESCE(?1, target_url), title = COALESCE(?2, title),
                        campaign_id = COALESCE(?3, campaign_id), updated_at = ?4
                 WHERE tenant_id = ?5 AND id = ?6",
                rusqlite::params![
                    req.target_url.as_deref().map(str::trim),
                    req.title,
                    req.campaign_id,
                    now_ts(),
                    tenant_id,
                    id,
                ],
            )?
        };
        if rows == 0 {
            return Ok(None);
        }
        self.get_shortlink(tenant_id, id)
    }

    /// Recorded clicks stay in the activity log
    pub fn delete_shortlink(&self, tenant_id: &str, id: &str) -> SqliteResult<bool> {
        let conn = self.conn();
        let rows = conn.execute("DELETE FROM shortlinks WHERE tenant_id = ?1 AND id = ?2", [tenant_id, id])?;
        Ok(rows > 0)
    }

    fn row_to_shortlink(row: &Row<'_>) -> SqliteResult<Shortlink> {
        let key: String = row.get(1)?;
        Ok(Shortlink {
            id: row.get(0)?,
            short_url: format!("/s/{}", key),
            key,
            target_url: row.get(2)?,
            title: row.get(3)?,
            campaign_id: row.get(4)?,
            created_at: ts_col(row, 5)?,
            updated_at: ts_col(row, 6)?,
            click_count: row.get(7)?,
        })
    }
}
