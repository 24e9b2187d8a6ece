use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::errors::{ServiceResult, Validator};

pub const GRID_COLUMNS: i64 = 12;
pub const MAX_LAYOUT_ITEMS: usize = 50;

pub const BUILTIN_WIDGETS: &[(&str, &str, i64, i64)] = &[
    ("funnel_summary", "Funnel summary", 6, 4),
    ("campaign_roi", "Campaign ROI", 6, 4),
    ("recent_activities", "Recent activities", 6, 5),
    ("top_developers", "Top developers", 6, 5),
];

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WidgetDescriptor {
    pub id: String,
    pub title: String,
    /// `builtin` or the key of the plugin that declares it
    pub provider: String,
    pub default_w: i64,
    pub default_h: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayoutItem {
    pub widget_id: String,
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardLayout {
    pub items: Vec<LayoutItem>,
}

impl DashboardLayout {
    /// Two-column arrangement of the built-in widgets
    pub fn default_layout() -> Self {
        let items = BUILTIN_WIDGETS
            .iter()
            .enumerate()
            .map(|(i, (id, _, w, h))| LayoutItem {
                widget_id: id.to_string(),
                x: (i as i64 % 2) * 6,
                y: (i as i64 / 2) * 5,
                w: *w,
                h: *h,
            })
            .collect();
        Self { items }
    }

    pub fn validate(&self, known_widgets: &HashSet<String>) -> ServiceResult<()> {
        let mut v = Validator::new();
        v.check(self.items.len() <= MAX_LAYOUT_ITEMS, "items", "too many widgets");

        let mut seen = HashSet::new();
        for (i, item) in self.items.iter().enumerate() {
            let field = format!("items[{}]", i);
            if !known_widgets.contains(&item.widget_id) {
                v.push(&field, format!("unknown widget '{}'", item.widget_id));
            }
            if !seen.insert(item.widget_id.as_str()) {
                v.push(&field, format!("widget '{}' appears more than once", item.widget_id));
            }
            if item.w < 1 || item.h < 1 {
                v.push(&field, "w and h must be at least 1");
            }
            if item.x < 0 || item.y < 0 {
                v.push(&field, "x and y must not be negative");
            }
            if item.x.checked_add(item.w).is_none_or(|right| right > GRID_COLUMNS) {
                v.push(&field, "widget extends past the 12-column grid");
            }
        }
        v.finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LayoutResponse {
    pub layout: DashboardLayout,
    pub is_default: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known() -> HashSet<String> {
        BUILTIN_WIDGETS.iter().map(|(id, ..)| id.to_string()).collect()
    }

    #[test]
    fn test_default_layout_is_valid() {
        assert!(DashboardLayout::default_layout().validate(&known()).is_ok());
    }

    #[test]
    fn test_rejects_overflow_unknown_and_duplicates() {
        let layout = DashboardLayout {
            items: vec![
                LayoutItem { widget_id: "funnel_summary".into(), x: 8, y: 0, w: 6, h: 2 },
                LayoutItem { widget_id: "funnel_summary".into(), x: 0, y: 0, w: 2, h: 2 },
                LayoutItem { widget_id: "weather".into(), x: 0, y: 3, w: 2, h: 0 },
            ],
        };
        match layout.validate(&known()) {
            Err(crate::errors::ServiceError::Validation { fields, .. }) => assert_eq!(fields.len(), 4),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_extents_that_overflow() {
        for (x, w) in [(1, i64::MAX), (i64::MAX, 1), (i64::MAX, i64::MAX)] {
            let layout = DashboardLayout {
                items: vec![LayoutItem { widget_id: "campaign_roi".into(), x, y: 0, w, h: 1 }],
            };
            assert!(layout.validate(&known()).is_err(), "x={} w={} accepted", x, w);
        }
    }
}
