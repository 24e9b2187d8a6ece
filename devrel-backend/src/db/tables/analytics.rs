//! Aggregation queries feeding the funnel and ROI reports
//!
//! Stage mapping happens in Rust (tenant overrides), so these queries group
//! by action and leave stage assignment to `crate::analytics`.

use chrono::NaiveDate;
use rusqlite::Result as SqliteResult;

use super::super::{ActivityFilter, Database};

/// Activity count for one `(action, actor)` pair
#[derive(Debug, Clone, PartialEq)]
pub struct FunnelRow {
    pub action: String,
    /// Developer id, else account id, else anonymous id (prefixed to stay distinct)
    pub actor: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineRow {
    pub day: NaiveDate,
    pub action: String,
    pub count: i64,
}

/// One activity-campaign link with the activity's value and fan-out
#[derive(Debug, Clone, PartialEq)]
pub struct AttributedActivity {
    pub campaign_id: String,
    pub value: Option<f64>,
    pub linked_campaigns: i64,
}

const ACTOR_SQL: &str =
    "COALESCE('dev:' || a.developer_id, 'acct:' || a.account_id, 'anon:' || a.anon_id, 'activity:' || a.id)";

impl Database {
    pub fn funnel_rows(&self, tenant_id: &str, filter: &ActivityFilter) -> SqliteResult<Vec<FunnelRow>> {
        let (where_sql, params) = filter.to_sql(tenant_id);
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT a.action, {actor} AS actor, COUNT(*) FROM activities a WHERE {where_sql}
             GROUP BY a.action, actor",
            actor = ACTOR_SQL,
            where_sql = where_sql
        ))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                Ok(FunnelRow {
                    action: row.get(0)?,
                    actor: row.get(1)?,
                    count: row.get(2)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// Daily counts per action (UTC days)
    pub fn timeline_rows(&self, tenant_id: &str, filter: &ActivityFilter) -> SqliteResult<Vec<TimelineRow>> {
        let (where_sql, params) = filter.to_sql(tenant_id);
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT substr(a.occurred_at, 1, 10) AS day, a.action, COUNT(*) FROM activities a
             WHERE {} GROUP BY day, a.action ORDER BY day",
            where_sql
        ))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                let raw: String = row.get(0)?;
                let day = NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
                })?;
                Ok(TimelineRow {
                    day,
                    action: row.get(1)?,
                    count: row.get(2)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// Attribution links, optionally for a single campaign
    pub fn attributed_activities(
        &self,
        tenant_id: &str,
        campaign_id: Option<&str>,
    ) -> SqliteResult<Vec<AttributedActivity>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT ac.campaign_id, a.value,
                    (SELECT COUNT(*) FROM activity_campaigns x WHERE x.activity_id = a.id)
             FROM activity_campaigns ac
             JOIN activities a ON a.id = ac.activity_id
             WHERE ac.tenant_id = ?1 AND a.tenant_id = ?1 AND (?2 IS NULL OR ac.campaign_id = ?2)",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![tenant_id, campaign_id], |row| {
                Ok(AttributedActivity {
                    campaign_id: row.get(0)?,
                    value: row.get(1)?,
                    linked_campaigns: row.get(2)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::activity::CreateActivityRequest;
    use crate::models::campaign::CreateCampaignRequest;
    use chrono::{TimeZone, Utc};

    fn setup() -> (Database, String) {
        let db = Database::new(":memory:").unwrap();
        let (tenant, _) = db.create_tenant_with_admin("Acme", "a@acme.dev", "A", "h").unwrap();
        (db, tenant.id)
    }

    fn record(db: &Database, tenant: &str, action: &str, anon: &str, campaigns: Vec<String>, value: Option<f64>) {
        let req = CreateActivityRequest {
            action: action.to_string(),
            source: "web".to_string(),
            anon_id: Some(anon.to_string()),
            occurred_at: Some(Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap()),
            campaign_ids: campaigns,
            value,
            ..Default::default()
        };
        db.create_activity(tenant, &req).unwrap();
    }

    #[test]
    fn test_funnel_rows_group_by_actor() {
        let (db, tenant) = setup();
        record(&db, &tenant, "view", "x", vec![], None);
        record(&db, &tenant, "view", "x", vec![], None);
        record(&db, &tenant, "view", "y", vec![], None);

        let mut rows = db.funnel_rows(&tenant, &ActivityFilter::default()).unwrap();
        rows.sort_by(|a, b| a.actor.cmp(&b.actor));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].actor, "anon:x");
        assert_eq!(rows[0].count, 2);
    }

    #[test]
    fn test_timeline_rows_bucket_by_day() {
        let (db, tenant) = setup();
        record(&db, &tenant, "view", "x", vec![], None);
        record(&db, &tenant, "star", "x", vec![], None);
        let rows = db.timeline_rows(&tenant, &ActivityFilter::default()).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.day == NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()));
    }

    #[test]
    fn test_attribution_reports_fan_out() {
        let (db, tenant) = setup();
        let mut ids = Vec::new();
        for name in ["a", "b"] {
            let c = db
                .create_campaign(
                    &tenant,
                    &CreateCampaignRequest {
                        name: name.to_string(),
                        description: None,
                        channel: None,
                        status: None,
                        start_date: None,
                        end_date: None,
                        budget_total: None,
                    },
                )
                .unwrap();
            ids.push(c.id);
        }
        record(&db, &tenant, "signup", "x", ids.clone(), Some(100.0));

        let links = db.attributed_activities(&tenant, Some(&ids[0])).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].linked_campaigns, 2);
        assert_eq!(links[0].value, Some(100.0));
        assert_eq!(db.attributed_activities(&tenant, None).unwrap().len(), 2);
    }
}
