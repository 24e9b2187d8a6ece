use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A logged-in browser/API session. The token itself is never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub user_id: String,
    pub tenant_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
