//! Tenant, user and auth session database operations

use chrono::{Duration, Utc};
use rusqlite::{OptionalExtension, Result as SqliteResult, Row};
use uuid::Uuid;

use crate::db::{fmt_ts, now_ts, ts_col};
use crate::models::{Role, Session, Tenant, User};
use super::super::Database;

const USER_COLUMNS: &str =
    "id, tenant_id, email, display_name, password_hash, role, created_at, updated_at";

impl Database {
    /// Create a tenant together with its first (admin) user
    pub fn create_tenant_with_admin(
        &self,
        tenant_name: &str,
        email: &str,
        display_name: &str,
        password_hash: &str,
    ) -> SqliteResult<(Tenant, User)> {
        let tenant_id = Uuid::new_v4().to_string();
        let user_id = Uuid::new_v4().to_string();
        let now = now_ts();

        self.transaction(|tx| {
            tx.execute(
                "INSERT INTO tenants (id, name, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![&tenant_id, tenant_name.trim(), &now],
            )?;
            tx.execute(
                "INSERT INTO users (id, tenant_id, email, display_name, password_hash, role, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'admin', ?6, ?6)",
                rusqlite::params![&user_id, &tenant_id, email, display_name, password_hash, &now],
            )?;
            Ok::<_, rusqlite::Error>(())
        })?;

        let tenant = self.get_tenant(&tenant_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        let user = self.get_user(&tenant_id, &user_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        Ok((tenant, user))
    }

    pub fn get_tenant(&self, tenant_id: &str) -> SqliteResult<Option<Tenant>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, created_at FROM tenants WHERE id = ?1",
            [tenant_id],
            |row| {
                Ok(Tenant {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: ts_col(row, 2)?,
                })
            },
        )
        .optional()
    }

    pub fn create_user(
        &self,
        tenant_id: &str,
        email: &str,
        display_name: &str,
        password_hash: &str,
        role: Role,
    ) -> SqliteResult<User> {
        let id = Uuid::new_v4().to_string();
        {
            let conn = self.conn();
            let now = now_ts();
            conn.execute(
                "INSERT INTO users (id, tenant_id, email, display_name, password_hash, role, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                rusqlite::params![&id, tenant_id, email, display_name, password_hash, role.as_ref(), &now],
            )?;
        }
        self.get_user(tenant_id, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_user(&self, tenant_id: &str, user_id: &str) -> SqliteResult<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM users WHERE tenant_id = ?1 AND id = ?2", USER_COLUMNS),
            [tenant_id, user_id],
            Self::row_to_user,
        )
        .optional()
    }

    /// Login lookup; emails are globally unique
    pub fn get_user_by_email(&self, email: &str) -> SqliteResult<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
            [email],
            Self::row_to_user,
        )
        .optional()
    }

    pub fn list_users(&self, tenant_id: &str) -> SqliteResult<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users WHERE tenant_id = ?1 ORDER BY created_at",
            USER_COLUMNS
        ))?;
        let users = stmt
            .query_map([tenant_id], Self::row_to_user)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(users)
    }

    /// Create a session for an already hashed token
    pub fn create_session(
        &self,
        user_id: &str,
        tenant_id: &str,
        token_hash: &str,
        ttl_hours: i64,
    ) -> SqliteResult<Session> {
        let conn = self.conn();
        let now = Utc::now();
        let expires_at = now + Duration::hours(ttl_hours);

        conn.execute(
            "INSERT INTO auth_sessions (token_hash, user_id, tenant_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![token_hash, user_id, tenant_id, fmt_ts(&now), fmt_ts(&expires_at)],
        )?;

        Ok(Session {
            id: conn.last_insert_rowid(),
            user_id: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            created_at: now,
            expires_at,
        })
    }

    /// Returns the session and its user when the token hash is known and unexpired
    pub fn validate_session(&self, token_hash: &str) -> SqliteResult<Option<(Session, User)>> {
        let conn = self.conn();
        let now = now_ts();

        conn.query_row(
            "SELECT s.id, s.user_id, s.tenant_id, s.created_at, s.expires_at,
                    u.id, u.tenant_id, u.email, u.display_name, u.password_hash, u.role, u.created_at, u.updated_at
             FROM auth_sessions s JOIN users u ON u.id = s.user_id
             WHERE s.token_hash = ?1 AND s.expires_at > ?2",
            [token_hash, now.as_str()],
            |row| {
                let session = Session {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    tenant_id: row.get(2)?,
                    created_at: ts_col(row, 3)?,
                    expires_at: ts_col(row, 4)?,
                };
                let user = User {
                    id: row.get(5)?,
                    tenant_id: row.get(6)?,
                    email: row.get(7)?,
                    display_name: row.get(8)?,
                    password_hash: row.get(9)?,
                    role: row.get::<_, String>(10)?.parse().unwrap_or(Role::Member),
                    created_at: ts_col(row, 11)?,
                    updated_at: ts_col(row, 12)?,
                };
                Ok((session, user))
            },
        )
        .optional()
    }

    pub fn delete_session(&self, token_hash: &str) -> SqliteResult<bool> {
        let conn = self.conn();
        let rows = conn.execute("DELETE FROM auth_sessions WHERE token_hash = ?1", [token_hash])?;
        Ok(rows > 0)
    }

    pub fn delete_expired_sessions(&self) -> SqliteResult<usize> {
        let conn = self.conn();
        conn.execute("DELETE FROM auth_sessions WHERE expires_at <= ?1", [now_ts()])
    }

    fn row_to_user(row: &Row<'_>) -> SqliteResult<User> {
        Ok(User {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            email: row.get(2)?,
            display_name: row.get(3)?,
            password_hash: row.get(4)?,
            role: row.get::<_, String>(5)?.parse().unwrap_or(Role::Member),
            created_at: ts_col(row, 6)?,
            updated_at: ts_col(row, 7)?,
        })
    }
}
