pub mod account;
pub mod activity;
pub mod api_token;
pub mod campaign;
pub mod dashboard;
pub mod developer;
pub mod funnel;
pub mod pagination;
pub mod plugin;
pub mod session;
pub mod shortlink;
pub mod system_settings;

pub use account::{Role, Tenant, User};
pub use activity::Activity;
pub use api_token::{ApiToken, TokenScope};
pub use campaign::{Budget, Campaign, CampaignRoi, Resource};
pub use developer::{Developer, Identifier, IdentifierInput, IdentifierKind, Organization};
pub use funnel::{FunnelStage, StageResolver};
pub use pagination::{Page, PageParams, Paginated};
pub use plugin::{Plugin, PluginEventRaw, PluginRun, RawEventStatus, RunStatus};
pub use session::Session;
pub use shortlink::Shortlink;
pub use system_settings::SystemSettings;
