//! API token database operations (hash-only storage)

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Result as SqliteResult, Row};
use uuid::Uuid;

use crate::db::{fmt_ts, now_ts, opt_ts_col, string_list_col, ts_col};
use crate::models::{ApiToken, Page, TokenScope};
use super::super::Database;

const TOKEN_COLUMNS: &str =
    "id, tenant_id, name, token_prefix, scopes, created_by, expires_at, revoked_at, last_used_at, created_at";

impl Database {
    #[allow(clippy::too_many_arguments)]
    pub fn create_api_token(
        &self,
        tenant_id: &str,
        name: &str,
        token_hash: &str,
        token_prefix: &str,
        scopes: &[TokenScope],
        created_by: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> SqliteResult<ApiToken> {
        let id = Uuid::new_v4().to_string();
        let scopes: Vec<String> = scopes.iter().map(|s| s.to_string()).collect();
        let scopes = serde_json::to_string(&scopes).unwrap_or_else(|_| "[]".to_string());
        {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO api_tokens (id, tenant_id, name, token_hash, token_prefix, scopes, created_by, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    &id,
                    tenant_id,
                    name.trim(),
                    token_hash,
                    token_prefix,
                    &scopes,
                    created_by,
                    expires_at.as_ref().map(fmt_ts),
                    now_ts(),
                ],
            )?;
        }
        self.get_api_token(tenant_id, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_api_token(&self, tenant_id: &str, id: &str) -> SqliteResult<Option<ApiToken>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM api_tokens WHERE tenant_id = ?1 AND id = ?2", TOKEN_COLUMNS),
            [tenant_id, id],
            Self::row_to_api_token,
        )
        .optional()
    }

    pub fn list_api_tokens(&self, tenant_id: &str, page: Page) -> SqliteResult<(Vec<ApiToken>, i64)> {
        let conn = self.conn();
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM api_tokens WHERE tenant_id = ?1",
            [tenant_id],
            |row| row.get(0),
        )?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM api_tokens WHERE tenant_id = ?1 ORDER BY created_at DESC, id LIMIT ?2 OFFSET ?3",
            TOKEN_COLUMNS
        ))?;
        let tokens = stmt
            .query_map(
                rusqlite::params![tenant_id, page.limit(), page.offset()],
                Self::row_to_api_token,
            )?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok((tokens, total))
    }

    /// Lookup for authentication; the caller checks status
    pub fn find_api_token_by_hash(&self, token_hash: &str) -> SqliteResult<Option<ApiToken>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM api_tokens WHERE token_hash = ?1", TOKEN_COLUMNS),
            [token_hash],
            Self::row_to_api_token,
        )
        .optional()
    }

    /// Revoke a token. Revoking twice keeps the first `revoked_at`.
    pub fn revoke_api_token(&self, tenant_id: &str, id: &str) -> SqliteResult<Option<ApiToken>> {
        let rows = {
            let conn = self.conn();
            conn.execute(
                "UPDATE api_tokens SET revoked_at = COALESCE(revoked_at, ?1) WHERE tenant_id = ?2 AND id = ?3",
                [now_ts().as_str(), tenant_id, id],
            )?
        };
        if rows == 0 {
            return Ok(None);
        }
        self.get_api_token(tenant_id, id)
    }

    pub fn touch_api_token(&self, id: &str) -> SqliteResult<()> {
        let conn = self.conn();
        conn.execute("UPDATE api_tokens SET last_used_at = ?1 WHERE id = ?2", [now_ts().as_str(), id])?;
        Ok(())
    }

    fn row_to_api_token(row: &Row<'_>) -> SqliteResult<ApiToken> {
        let scopes = string_list_col(row, 4)?
            .iter()
            .filter_map(|s| s.parse::<TokenScope>().ok())
            .collect();
        Ok(ApiToken {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            name: row.get(2)?,
            token_prefix: row.get(3)?,
            scopes,
            created_by: row.get(5)?,
            expires_at: opt_ts_col(row, 6)?,
            revoked_at: opt_ts_col(row, 7)?,
            last_used_at: opt_ts_col(row, 8)?,
            created_at: ts_col(row, 9)?,
        })
    }
}
