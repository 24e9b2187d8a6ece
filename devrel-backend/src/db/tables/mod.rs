//! Table modules - extend Database with domain-specific methods
//!
//! Each module adds `impl Database` blocks for a specific table group.

mod accounts;           // tenants, users, auth_sessions
pub mod activities;     // activities, activity_campaigns, funnel_stage_mappings
pub mod analytics;      // funnel / timeline / attribution aggregates
mod api_tokens;         // api_tokens
mod campaigns;          // campaigns, budgets, resources
pub mod developers;     // organizations, developers, developer_identifiers
mod plugins;            // plugins, plugin_runs, plugin_events_raw
mod shortlinks;         // shortlinks
mod system_settings;    // system_settings, user_settings
