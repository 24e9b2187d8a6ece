use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FunnelStage {
    Awareness,
    Engagement,
    Adoption,
    Advocacy,
}

impl FunnelStage {
    pub fn ordered() -> Vec<FunnelStage> {
        FunnelStage::iter().collect()
    }
}

/// Built-in action -> stage table; tenants can override single actions
static DEFAULT_STAGES: Lazy<HashMap<&'static str, FunnelStage>> = Lazy::new(|| {
    use FunnelStage::*;
    let table: &[(&str, FunnelStage)] = &[
        ("view", Awareness),
        ("page_view", Awareness),
        ("visit", Awareness),
        ("impression", Awareness),
        ("click", Awareness),
        ("read", Awareness),
        ("watch", Awareness),
        ("star", Engagement),
        ("follow", Engagement),
        ("comment", Engagement),
        ("like", Engagement),
        ("reply", Engagement),
        ("attend", Engagement),
        ("register", Engagement),
        ("join", Engagement),
        ("subscribe", Engagement),
        ("signup", Adoption),
        ("install", Adoption),
        ("download", Adoption),
        ("api_call", Adoption),
        ("login", Adoption),
        ("deploy", Adoption),
        ("trial_start", Adoption),
        ("share", Advocacy),
        ("contribute", Advocacy),
        ("pull_request", Advocacy),
        ("refer", Advocacy),
        ("review", Advocacy),
        ("talk", Advocacy),
        ("post", Advocacy),
        ("mention", Advocacy),
    ];
    table.iter().copied().collect()
});

pub fn default_stage_for(action: &str) -> Option<FunnelStage> {
    DEFAULT_STAGES.get(normalize_action(action).as_str()).copied()
}

pub fn normalize_action(action: &str) -> String {
    action.trim().to_lowercase()
}

/// Resolves an activity action to its funnel stage for one tenant
#[derive(Debug, Clone, Default)]
pub struct StageResolver {
    overrides: HashMap<String, FunnelStage>,
}

impl StageResolver {
    pub fn new(overrides: HashMap<String, FunnelStage>) -> Self {
        Self { overrides }
    }

    pub fn stage_for(&self, action: &str) -> Option<FunnelStage> {
        let action = normalize_action(action);
        self.overrides
            .get(&action)
            .copied()
            .or_else(|| DEFAULT_STAGES.get(action.as_str()).copied())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageMapping {
    pub action: String,
    pub stage: FunnelStage,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageMappingsResponse {
    pub defaults: Vec<StageMapping>,
    pub overrides: Vec<StageMapping>,
}

pub fn default_mappings() -> Vec<StageMapping> {
    let mut mappings: Vec<StageMapping> = DEFAULT_STAGES
        .iter()
        .map(|(action, stage)| StageMapping {
            action: action.to_string(),
            stage: *stage,
        })
        .collect();
    mappings.sort_by(|a, b| a.stage.cmp(&b.stage).then_with(|| a.action.cmp(&b.action)));
    mappings
}

#[derive(Debug, Clone, Deserialize)]
pub struct PutStageMappingsRequest {
    pub mappings: Vec<StageMapping>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FunnelQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub campaign_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StageSummary {
    pub stage: FunnelStage,
    pub activity_count: i64,
    pub unique_developers: i64,
    /// unique(stage) / unique(previous stage); absent for the first stage
    pub conversion_rate: Option<f64>,
    pub drop_off_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct UnmappedSummary {
    pub activity_count: i64,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunnelReport {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub campaign_id: Option<String>,
    pub stages: Vec<StageSummary>,
    pub unmapped: UnmappedSummary,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct TimelinePoint {
    pub date: NaiveDate,
    pub awareness: i64,
    pub engagement: i64,
    pub adoption: i64,
    pub advocacy: i64,
}

impl TimelinePoint {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            ..Default::default()
        }
    }

    pub fn add(&mut self, stage: FunnelStage, count: i64) {
        match stage {
            FunnelStage::Awareness => self.awareness += count,
            FunnelStage::Engagement => self.engagement += count,
            FunnelStage::Adoption => self.adoption += count,
            FunnelStage::Advocacy => self.advocacy += count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_lookup() {
        assert_eq!(default_stage_for("Click"), Some(FunnelStage::Awareness));
        assert_eq!(default_stage_for("star"), Some(FunnelStage::Engagement));
        assert_eq!(default_stage_for("install"), Some(FunnelStage::Adoption));
        assert_eq!(default_stage_for("pull_request"), Some(FunnelStage::Advocacy));
        assert_eq!(default_stage_for("teleport"), None);
    }

    #[test]
    fn test_override_wins() {
        let mut overrides = HashMap::new();
        overrides.insert("click".to_string(), FunnelStage::Engagement);
        overrides.insert("hackathon_win".to_string(), FunnelStage::Advocacy);
        let resolver = StageResolver::new(overrides);
        assert_eq!(resolver.stage_for("click"), Some(FunnelStage::Engagement));
        assert_eq!(resolver.stage_for("hackathon_win"), Some(FunnelStage::Advocacy));
        assert_eq!(resolver.stage_for("install"), Some(FunnelStage::Adoption));
    }

    #[test]
    fn test_stage_order() {
        assert_eq!(
            FunnelStage::ordered(),
            vec![
                FunnelStage::Awareness,
                FunnelStage::Engagement,
                FunnelStage::Adoption,
                FunnelStage::Advocacy
            ]
        );
    }
}
