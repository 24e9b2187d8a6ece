use std::collections::HashMap;

use crate::db::AttributedActivity;
use crate::models::CampaignRoi;

/// Linear multi-touch attribution: an activity linked to `n` campaigns
/// credits `value / n` to each of them.
pub fn compute(campaigns: &[(String, String, f64)], links: &[AttributedActivity]) -> Vec<CampaignRoi> {
    let mut credited: HashMap<&str, (f64, i64)> = HashMap::new();
    for link in links {
        let share = match (link.value, link.linked_campaigns) {
            (Some(value), n) if n > 0 => value / n as f64,
            _ => 0.0,
        };
        let entry = credited.entry(link.campaign_id.as_str()).or_default();
        entry.0 += share;
        entry.1 += 1;
    }

    campaigns
        .iter()
        .map(|(id, name, cost)| {
            let (attributed_value, attributed_activities) = credited.get(id.as_str()).copied().unwrap_or_default();
            CampaignRoi {
                campaign_id: id.clone(),
                campaign_name: name.clone(),
                cost: *cost,
                attributed_value,
                attributed_activities,
                roi: if *cost > 0.0 {
                    Some((attributed_value - cost) / cost)
                } else {
                    None
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(campaign: &str, value: Option<f64>, n: i64) -> AttributedActivity {
        AttributedActivity {
            campaign_id: campaign.to_string(),
            value,
            linked_campaigns: n,
        }
    }

    #[test]
    fn test_linear_split() {
        let campaigns = vec![
            ("a".to_string(), "A".to_string(), 100.0),
            ("b".to_string(), "B".to_string(), 0.0),
        ];
        let links = vec![
            link("a", Some(300.0), 2),
            link("b", Some(300.0), 2),
            link("a", Some(50.0), 1),
            link("a", None, 1),
        ];
        let roi = compute(&campaigns, &links);

        assert_eq!(roi[0].attributed_value, 200.0);
        assert_eq!(roi[0].attributed_activities, 3);
        assert_eq!(roi[0].roi, Some(1.0));

        assert_eq!(roi[1].attributed_value, 150.0);
        assert_eq!(roi[1].roi, None);
    }

    #[test]
    fn test_campaign_without_links() {
        let roi = compute(&[("a".to_string(), "A".to_string(), 40.0)], &[]);
        assert_eq!(roi[0].attributed_value, 0.0);
        assert_eq!(roi[0].roi, Some(-1.0));
    }
}
