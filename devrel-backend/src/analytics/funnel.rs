use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::db::{FunnelRow, TimelineRow};
use crate::models::funnel::{FunnelQuery, FunnelReport, StageSummary, TimelinePoint, UnmappedSummary};
use crate::models::{FunnelStage, StageResolver};

/// Fold `(action, actor, count)` rows into per-stage totals.
///
/// Conversion for a stage is unique actors in the stage divided by unique
/// actors in the previous one; it is absent for the first stage and when the
/// previous stage is empty.
pub fn build_report(rows: &[FunnelRow], resolver: &StageResolver, query: &FunnelQuery) -> FunnelReport {
    let mut counts: HashMap<FunnelStage, i64> = HashMap::new();
    let mut actors: HashMap<FunnelStage, HashSet<&str>> = HashMap::new();
    let mut unmapped_count = 0;
    let mut unmapped_actions = BTreeSet::new();

    for row in rows {
        match resolver.stage_for(&row.action) {
            Some(stage) => {
                *counts.entry(stage).or_default() += row.count;
                actors.entry(stage).or_default().insert(row.actor.as_str());
            }
            None => {
                unmapped_count += row.count;
                unmapped_actions.insert(row.action.clone());
            }
        }
    }

    let mut stages = Vec::new();
    let mut previous_unique: Option<i64> = None;
    for stage in FunnelStage::ordered() {
        let unique = actors.get(&stage).map(|a| a.len() as i64).unwrap_or(0);
        let conversion_rate = match previous_unique {
            Some(prev) if prev > 0 => Some(unique as f64 / prev as f64),
            _ => None,
        };
        stages.push(StageSummary {
            stage,
            activity_count: counts.get(&stage).copied().unwrap_or(0),
            unique_developers: unique,
            conversion_rate,
            drop_off_rate: conversion_rate.map(|c| 1.0 - c),
        });
        previous_unique = Some(unique);
    }

    FunnelReport {
        from: query.from,
        to: query.to,
        campaign_id: query.campaign_id.clone(),
        stages,
        unmapped: UnmappedSummary {
            activity_count: unmapped_count,
            actions: unmapped_actions.into_iter().collect(),
        },
    }
}

/// Daily stage counts, dense between the first and last day with data
pub fn build_timeline(rows: &[TimelineRow], resolver: &StageResolver) -> Vec<TimelinePoint> {
    let mut points: BTreeMap<NaiveDate, TimelinePoint> = BTreeMap::new();
    for row in rows {
        let Some(stage) = resolver.stage_for(&row.action) else {
            continue;
        };
        let point = points.entry(row.day).or_insert_with(|| TimelinePoint::new(row.day));
        point.add(stage, row.count);
    }

    let (Some(first), Some(last)) = (points.keys().next().copied(), points.keys().last().copied()) else {
        return Vec::new();
    };
    first
        .iter_days()
        .take_while(|day| *day <= last)
        .map(|day| points.remove(&day).unwrap_or_else(|| TimelinePoint::new(day)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(action: &str, actor: &str, count: i64) -> FunnelRow {
        FunnelRow {
            action: action.to_string(),
            actor: actor.to_string(),
            count,
        }
    }

    #[test]
    fn test_conversion_between_stages() {
        let rows = vec![
            row("view", "dev:a", 3),
            row("view", "dev:b", 1),
            row("click", "dev:c", 1),
            row("view", "dev:d", 1),
            row("star", "dev:a", 1),
            row("star", "dev:b", 1),
            row("install", "dev:a", 2),
            row("teleport", "dev:z", 4),
        ];
        let report = build_report(&rows, &StageResolver::default(), &FunnelQuery::default());

        let awareness = &report.stages[0];
        assert_eq!(awareness.stage, FunnelStage::Awareness);
        assert_eq!(awareness.activity_count, 6);
        assert_eq!(awareness.unique_developers, 4);
        assert_eq!(awareness.conversion_rate, None);

        let engagement = &report.stages[1];
        assert_eq!(engagement.unique_developers, 2);
        assert_eq!(engagement.conversion_rate, Some(0.5));
        assert_eq!(engagement.drop_off_rate, Some(0.5));

        let adoption = &report.stages[2];
        assert_eq!(adoption.activity_count, 2);
        assert_eq!(adoption.conversion_rate, Some(0.5));

        let advocacy = &report.stages[3];
        assert_eq!(advocacy.unique_developers, 0);
        assert_eq!(advocacy.conversion_rate, Some(0.0));
        assert_eq!(advocacy.drop_off_rate, Some(1.0));

        assert_eq!(report.unmapped.activity_count, 4);
        assert_eq!(report.unmapped.actions, vec!["teleport".to_string()]);
    }

    #[test]
    fn test_empty_previous_stage_has_no_rate() {
        let report = build_report(&[row("install", "dev:a", 1)], &StageResolver::default(), &FunnelQuery::default());
        assert_eq!(report.stages[2].conversion_rate, None);
        assert_eq!(report.stages[3].conversion_rate, Some(0.0));
    }

    #[test]
    fn test_overrides_move_actions() {
        let mut overrides = HashMap::new();
        overrides.insert("teleport".to_string(), FunnelStage::Advocacy);
        let report = build_report(
            &[row("teleport", "dev:z", 2)],
            &StageResolver::new(overrides),
            &FunnelQuery::default(),
        );
        assert_eq!(report.stages[3].activity_count, 2);
        assert_eq!(report.unmapped.activity_count, 0);
    }

    #[test]
    fn test_timeline_fills_gaps() {
        let day = |d| NaiveDate::from_ymd_opt(2024, 3, d).unwrap();
        let rows = vec![
            TimelineRow { day: day(1), action: "view".to_string(), count: 2 },
            TimelineRow { day: day(1), action: "teleport".to_string(), count: 9 },
            TimelineRow { day: day(3), action: "install".to_string(), count: 1 },
        ];
        let points = build_timeline(&rows, &StageResolver::default());
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].awareness, 2);
        assert_eq!(points[1], TimelinePoint::new(day(2)));
        assert_eq!(points[2].adoption, 1);
        assert!(build_timeline(&[], &StageResolver::default()).is_empty());
    }
}
