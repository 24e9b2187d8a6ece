use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::errors::{ServiceResult, Validator};

pub const MAX_CAMPAIGN_NAME_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr, Default)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CampaignStatus {
    #[default]
    Draft,
    Active,
    Paused,
    Completed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Campaign {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub description: Option<String>,
    pub channel: Option<String>,
    pub status: CampaignStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub budget_total: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub description: Option<String>,
    pub channel: Option<String>,
    pub status: Option<CampaignStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub budget_total: Option<f64>,
}

impl CreateCampaignRequest {
    pub fn validate(&self) -> ServiceResult<()> {
        let mut v = Validator::new();
        check_name(&mut v, &self.name);
        check_dates(&mut v, self.start_date, self.end_date);
        check_budget(&mut v, self.budget_total);
        v.finish()
    }
}

/// Partial update; absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCampaignRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub channel: Option<String>,
    pub status: Option<CampaignStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub budget_total: Option<f64>,
}

impl UpdateCampaignRequest {
    /// Validate against the current row so the merged date range stays ordered
    pub fn validate(&self, current: &Campaign) -> ServiceResult<()> {
        let mut v = Validator::new();
        if let Some(name) = &self.name {
            check_name(&mut v, name);
        }
        check_dates(
            &mut v,
            self.start_date.or(current.start_date),
            self.end_date.or(current.end_date),
        );
        check_budget(&mut v, self.budget_total);
        v.finish()
    }
}

fn check_name(v: &mut Validator, name: &str) {
    let name = name.trim();
    v.check(!name.is_empty(), "name", "is required");
    v.check(
        name.chars().count() <= MAX_CAMPAIGN_NAME_LEN,
        "name",
        "must be at most 200 characters",
    );
}

fn check_dates(v: &mut Validator, start: Option<NaiveDate>, end: Option<NaiveDate>) {
    if let (Some(start), Some(end)) = (start, end) {
        v.check(end >= start, "end_date", "must not be before start_date");
    }
}

fn check_budget(v: &mut Validator, budget: Option<f64>) {
    if let Some(budget) = budget {
        v.check(budget.is_finite() && budget >= 0.0, "budget_total", "must be a non-negative number");
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CampaignListQuery {
    pub q: Option<String>,
    pub status: Option<CampaignStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Budget {
    pub id: String,
    pub campaign_id: String,
    pub category: String,
    pub amount: f64,
    pub spent_at: Option<NaiveDate>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBudgetRequest {
    pub category: String,
    pub amount: f64,
    pub spent_at: Option<NaiveDate>,
    pub note: Option<String>,
}

impl CreateBudgetRequest {
    pub fn validate(&self) -> ServiceResult<()> {
        Validator::new()
            .check(!self.category.trim().is_empty(), "category", "is required")
            .check(self.amount.is_finite() && self.amount >= 0.0, "amount", "must be a non-negative number")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Resource {
    pub id: String,
    pub campaign_id: Option<String>,
    pub title: String,
    pub url: Option<String>,
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateResourceRequest {
    pub title: String,
    pub url: Option<String>,
    pub kind: Option<String>,
    pub campaign_id: Option<String>,
}

impl CreateResourceRequest {
    pub fn validate(&self) -> ServiceResult<()> {
        let mut v = Validator::new();
        v.check(!self.title.trim().is_empty(), "title", "is required");
        if let Some(url) = &self.url {
            v.check(is_http_url(url), "url", "must be an absolute http(s) URL");
        }
        v.finish()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResourceListQuery {
    pub campaign_id: Option<String>,
}

/// Cost vs. attributed value for one campaign
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CampaignRoi {
    pub campaign_id: String,
    pub campaign_name: String,
    pub cost: f64,
    pub attributed_value: f64,
    pub attributed_activities: i64,
    /// `(value - cost) / cost`; absent when nothing was spent
    pub roi: Option<f64>,
}

pub fn is_http_url(raw: &str) -> bool {
    match url::Url::parse(raw.trim()) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some(),
        Err(_) => false,
    }
}
