//! Campaign, budget and resource database operations

use rusqlite::{OptionalExtension, Result as SqliteResult, Row, ToSql};
use uuid::Uuid;

use crate::db::{fmt_date, now_ts, opt_date_col, ts_col};
use crate::models::campaign::{
    CampaignListQuery, CampaignStatus, CreateBudgetRequest, CreateCampaignRequest, CreateResourceRequest,
    UpdateCampaignRequest,
};
use crate::models::{Budget, Campaign, Page, Resource};
use super::super::Database;

const CAMPAIGN_COLUMNS: &str = "id, tenant_id, name, description, channel, status, start_date, end_date, budget_total, created_at, updated_at";

impl Database {
    pub fn create_campaign(&self, tenant_id: &str, req: &CreateCampaignRequest) -> SqliteResult<Campaign> {
        let id = Uuid::new_v4().to_string();
        {
            let conn = self.conn();
            let now = now_ts();
            conn.execute(
                "INSERT INTO campaigns (id, tenant_id, name, description, channel, status, start_date, end_date, budget_total, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                rusqlite::params![
                    &id,
                    tenant_id,
                    req.name.trim(),
                    req.description,
                    req.channel,
                    req.status.unwrap_or_default().as_ref(),
                    req.start_date.as_ref().map(fmt_date),
                    req.end_date.as_ref().map(fmt_date),
                    req.budget_total.unwrap_or(0.0),
                    &now,
                ],
            )?;
        }
        self.get_campaign(tenant_id, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_campaign(&self, tenant_id: &str, id: &str) -> SqliteResult<Option<Campaign>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM campaigns WHERE tenant_id = ?1 AND id = ?2", CAMPAIGN_COLUMNS),
            [tenant_id, id],
            Self::row_to_campaign,
        )
        .optional()
    }

    /// Filtered, paginated list ordered newest first
    pub fn list_campaigns(
        &self,
        tenant_id: &str,
        query: &CampaignListQuery,
        page: Page,
    ) -> SqliteResult<(Vec<Campaign>, i64)> {
        let mut clauses = vec!["tenant_id = ?".to_string()];
        let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(tenant_id.to_string())];

        if let Some(q) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            clauses.push("LOWER(name) LIKE ?".to_string());
            params.push(Box::new(format!("%{}%", q.to_lowercase())));
        }
        if let Some(status) = query.status {
            clauses.push("status = ?".to_string());
            params.push(Box::new(status.as_ref().to_string()));
        }
        let where_sql = clauses.join(" AND ");

        let conn = self.conn();
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM campaigns WHERE {}", where_sql),
            rusqlite::params_from_iter(params.iter()),
            |row| row.get(0),
        )?;

        params.push(Box::new(page.limit()));
        params.push(Box::new(page.offset()));
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM campaigns WHERE {} ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
            CAMPAIGN_COLUMNS, where_sql
        ))?;
        let campaigns = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), Self::row_to_campaign)?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok((campaigns, total))
    }

    pub fn update_campaign(
        &self,
        tenant_id: &str,
        id: &str,
        req: &UpdateCampaignRequest,
    ) -> SqliteResult<Option<Campaign>> {
        let Some(current) = self.get_campaign(tenant_id, id)? else {
            return Ok(None);
        };

        {
            let conn = self.conn();
            conn.execute(
                "UPDATE campaigns SET name = ?1, description = ?2, channel = ?3, status = ?4, start_date = ?5,
                        end_date = ?6, budget_total = ?7, updated_at = ?8
                 WHERE tenant_id = ?9 AND id = ?10",
                rusqlite::params![
                    req.name.as_deref().map(str::trim).unwrap_or(&current.name),
                    req.description.as_ref().or(current.description.as_ref()),
                    req.channel.as_ref().or(current.channel.as_ref()),
                    req.status.unwrap_or(current.status).as_ref(),
                    req.start_date.or(current.start_date).as_ref().map(fmt_date),
                    req.end_date.or(current.end_date).as_ref().map(fmt_date),
                    req.budget_total.unwrap_or(current.budget_total),
                    now_ts(),
                    tenant_id,
                    id,
                ],
            )?;
        }
        self.get_campaign(tenant_id, id)
    }

    /// Budgets cascade; resources and shortlinks keep existing without a campaign
    pub fn delete_campaign(&self, tenant_id: &str, id: &str) -> SqliteResult<bool> {
        let conn = self.conn();
        let rows = conn.execute("DELETE FROM campaigns WHERE tenant_id = ?1 AND id = ?2", [tenant_id, id])?;
        Ok(rows > 0)
    }

    /// Returns the ids from `ids` that do not name a campaign of this tenant
    pub fn missing_campaigns(&self, tenant_id: &str, ids: &[String]) -> SqliteResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT 1 FROM campaigns WHERE tenant_id = ?1 AND id = ?2")?;
        let mut missing = Vec::new();
        for id in ids {
            if !stmt.exists([tenant_id, id.as_str()])? {
                missing.push(id.clone());
            }
        }
        Ok(missing)
    }

    pub fn add_budget(&self, tenant_id: &str, campaign_id: &str, req: &CreateBudgetRequest) -> SqliteResult<Budget> {
        let conn = self.conn();
        let id = Uuid::new_v4().to_string();
        let now = now_ts();
        conn.execute(
            "INSERT INTO budgets (id, tenant_id, campaign_id, category, amount, spent_at, note, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                &id,
                tenant_id,
                campaign_id,
                req.category.trim(),
                req.amount,
                req.spent_at.as_ref().map(fmt_date),
                req.note,
                &now,
            ],
        )?;
        conn.query_row(
            "SELECT id, campaign_id, category, amount, spent_at, note, created_at FROM budgets WHERE id = ?1",
            [&id],
            Self::row_to_budget,
        )
    }

    pub fn list_budgets(&self, tenant_id: &str, campaign_id: &str) -> SqliteResult<Vec<Budget>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, campaign_id, category, amount, spent_at, note, created_at FROM budgets
             WHERE tenant_id = ?1 AND campaign_id = ?2 ORDER BY created_at",
        )?;
        let budgets = stmt
            .query_map([tenant_id, campaign_id], Self::row_to_budget)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(budgets)
    }

    pub fn delete_budget(&self, tenant_id: &str, campaign_id: &str, budget_id: &str) -> SqliteResult<bool> {
        let conn = self.conn();
        let rows = conn.execute(
            "DELETE FROM budgets WHERE tenant_id = ?1 AND campaign_id = ?2 AND id = ?3",
            [tenant_id, campaign_id, budget_id],
        )?;
        Ok(rows > 0)
    }

    /// Total spend: the sum of the campaign's budget line items
    pub fn campaign_cost(&self, tenant_id: &str, campaign_id: &str) -> SqliteResult<f64> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM budgets WHERE tenant_id = ?1 AND campaign_id = ?2",
            [tenant_id, campaign_id],
            |row| row.get(0),
        )
    }

    /// `(id, name, cost)` for every campaign of the tenant
    pub fn campaign_costs(&self, tenant_id: &str) -> SqliteResult<Vec<(String, String, f64)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT c.id, c.name, COALESCE(SUM(b.amount), 0) FROM campaigns c
             LEFT JOIN budgets b ON b.campaign_id = c.id
             WHERE c.tenant_id = ?1 GROUP BY c.id ORDER BY c.name",
        )?;
        let rows = stmt
            .query_map([tenant_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn create_resource(&self, tenant_id: &str, req: &CreateResourceRequest) -> SqliteResult<Resource> {
        let conn = self.conn();
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO resources (id, tenant_id, campaign_id, title, url, kind, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                &id,
                tenant_id,
                req.campaign_id,
                req.title.trim(),
                req.url.as_deref().map(str::trim),
                req.kind.as_deref().unwrap_or("other"),
                now_ts(),
            ],
        )?;
        conn.query_row(
            "SELECT id, campaign_id, title, url, kind, created_at FROM resources WHERE id = ?1",
            [&id],
            Self::row_to_resource,
        )
    }

    pub fn list_resources(&self, tenant_id: &str, campaign_id: Option<&str>) -> SqliteResult<Vec<Resource>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, campaign_id, title, url, kind, created_at FROM resources
             WHERE tenant_id = ?1 AND (?2 IS NULL OR campaign_id = ?2) ORDER BY created_at DESC",
        )?;
        let resources = stmt
            .query_map(rusqlite::params![tenant_id, campaign_id], Self::row_to_resource)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(resources)
    }

    pub fn delete_resource(&self, tenant_id: &str, id: &str) -> SqliteResult<bool> {
        let conn = self.conn();
        let rows = conn.execute("DELETE FROM resources WHERE tenant_id = ?1 AND id = ?2", [tenant_id, id])?;
        Ok(rows > 0)
    }

    fn row_to_campaign(row: &Row<'_>) -> SqliteResult<Campaign> {
        Ok(Campaign {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            channel: row.get(4)?,
            status: row.get::<_, String>(5)?.parse().unwrap_or(CampaignStatus::Draft),
            start_date: opt_date_col(row, 6)?,
            end_date: opt_date_col(row, 7)?,
            budget_total: row.get(8)?,
            created_at: ts_col(row, 9)?,
            updated_at: ts_col(row, 10)?,
        })
    }

    fn row_to_budget(row: &Row<'_>) -> SqliteResult<Budget> {
        Ok(Budget {
            id: row.get(0)?,
            campaign_id: row.get(1)?,
            category: row.get(2)?,
            amount: row.get(3)?,
            spent_at: opt_date_col(row, 4)?,
            note: row.get(5)?,
            created_at: ts_col(row, 6)?,
        })
    }

    fn row_to_resource(row: &Row<'_>) -> SqliteResult<Resource> {
        Ok(Resource {
            id: row.get(0)?,
            campaign_id: row.get(1)?,
            title: row.get(2)?,
            url: row.get(3)?,
            kind: row.get(4)?,
            created_at: ts_col(row, 5)?,
        })
    }
}
