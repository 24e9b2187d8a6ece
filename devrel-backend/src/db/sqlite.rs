//! SQLite database - schema definitions and connection management
//!
//! This file contains:
//! - Database struct definition
//! - Connection management (new, init, transaction)
//! - Schema creation and migrations
//!
//! All table operations are in the tables/ subdirectory. Every tenant-owned
//! table carries a `tenant_id` column and every query filters on it.

use rusqlite::{Connection, Result as SqliteResult, Transaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Main database wrapper; a single connection guarded by a Mutex
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Create a new database connection and initialize schema
    pub fn new(database_url: &str) -> SqliteResult<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(database_url).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let conn = Connection::open(database_url)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    /// Lock the connection. A panic while holding the lock leaves SQLite in a
    /// consistent state (statements are atomic), so poisoning is ignored.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` inside a transaction; commits on Ok, rolls back on Err
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<rusqlite::Error>,
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Cheap liveness probe for the health endpoint
    pub fn ping(&self) -> SqliteResult<()> {
        let conn = self.conn();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    /// Initialize all database tables and run migrations
    fn init(&self) -> SqliteResult<()> {
        let conn = self.conn();

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        // Tenants and users
        conn.execute(
            "CREATE TABLE IF NOT EXISTS tenants (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                email TEXT UNIQUE NOT NULL,
                display_name TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'member',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // Auth sessions (only the token hash is stored)
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token_hash TEXT UNIQUE NOT NULL,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                tenant_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )",
            [],
        )?;

        // Per-user settings (dashboard layout)
        conn.execute(
            "CREATE TABLE IF NOT EXISTS user_settings (
                user_id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                tenant_id TEXT NOT NULL,
                dashboard_layout TEXT,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // Organizations and developers
        conn.execute(
            "CREATE TABLE IF NOT EXISTS organizations (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                domain TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(tenant_id, name)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS developers (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                display_name TEXT NOT NULL,
                primary_email TEXT,
                org_id TEXT REFERENCES organizations(id) ON DELETE SET NULL,
                avatar_url TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS developer_identifiers (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                developer_id TEXT NOT NULL REFERENCES developers(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                value TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(tenant_id, kind, value)
            )",
            [],
        )?;

        // Campaigns, budgets, resources
        conn.execute(
            "CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                description TEXT,
                channel TEXT,
                status TEXT NOT NULL DEFAULT 'draft',
                start_date TEXT,
                end_date TEXT,
                budget_total REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(tenant_id, name)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS budgets (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                campaign_id TEXT NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
                category TEXT NOT NULL,
                amount REAL NOT NULL,
                spent_at TEXT,
                note TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS resources (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                campaign_id TEXT REFERENCES campaigns(id) ON DELETE SET NULL,
                title TEXT NOT NULL,
                url TEXT,
                kind TEXT NOT NULL DEFAULT 'other',
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        // Activities (append-mostly event log) and multi-touch attribution
        conn.execute(
            "CREATE TABLE IF NOT EXISTS activities (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                developer_id TEXT REFERENCES developers(id) ON DELETE SET NULL,
                account_id TEXT,
                anon_id TEXT,
                action TEXT NOT NULL,
                source TEXT NOT NULL,
                occurred_at TEXT NOT NULL,
                value REAL,
                confidence REAL,
                metadata TEXT,
                dedup_key TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(tenant_id, dedup_key)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_activities_tenant_time ON activities(tenant_id, occurred_at)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_activities_tenant_source ON activities(tenant_id, source)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS activity_campaigns (
                activity_id TEXT NOT NULL REFERENCES activities(id) ON DELETE CASCADE,
                campaign_id TEXT NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
                tenant_id TEXT NOT NULL,
                PRIMARY KEY(activity_id, campaign_id)
            )",
            [],
        )?;

        // Tenant overrides of the action -> funnel stage table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS funnel_stage_mappings (
                tenant_id TEXT NOT NULL,
                action TEXT NOT NULL,
                stage TEXT NOT NULL,
                PRIMARY KEY(tenant_id, action)
            )",
            [],
        )?;

        // Plugins, job runs, raw events
        conn.execute(
            "CREATE TABLE IF NOT EXISTS plugins (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                key TEXT NOT NULL,
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                config TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(tenant_id, key)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS plugin_runs (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                plugin_id TEXT NOT NULL REFERENCES plugins(id) ON DELETE CASCADE,
                job_name TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT,
                events_processed INTEGER NOT NULL DEFAULT 0,
                duration_ms INTEGER,
                error TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_plugin_runs_job ON plugin_runs(plugin_id, job_name, created_at)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS plugin_events_raw (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                plugin_id TEXT NOT NULL REFERENCES plugins(id) ON DELETE CASCADE,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                error TEXT,
                received_at TEXT NOT NULL,
                processed_at TEXT
            )",
            [],
        )?;

        // Shortlinks (keys are global so the public redirect needs no tenant)
        conn.execute(
            "CREATE TABLE IF NOT EXISTS shortlinks (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                key TEXT UNIQUE NOT NULL,
                target_url TEXT NOT NULL,
                title TEXT,
                campaign_id TEXT REFERENCES campaigns(id) ON DELETE SET NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // API tokens (hash only; status is computed)
        conn.execute(
            "CREATE TABLE IF NOT EXISTS api_tokens (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                token_hash TEXT UNIQUE NOT NULL,
                token_prefix TEXT NOT NULL,
                scopes TEXT NOT NULL DEFAULT '[]',
                created_by TEXT,
                expires_at TEXT,
                revoked_at TEXT,
                last_used_at TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        // System settings: one row per tenant, secret fields encrypted inside the JSON
        conn.execute(
            "CREATE TABLE IF NOT EXISTS system_settings (
                tenant_id TEXT PRIMARY KEY REFERENCES tenants(id) ON DELETE CASCADE,
                smtp TEXT NOT NULL DEFAULT '{}',
                s3 TEXT NOT NULL DEFAULT '{}',
                ai TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/devrel.db");
        let path = path.to_string_lossy().to_string();
        Database::new(&path).unwrap();
        let db = Database::new(&path).unwrap();
        db.ping().unwrap();
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::new(":memory:").unwrap();
        let result: Result<(), rusqlite::Error> = db.transaction(|tx| {
            tx.execute(
                "INSERT INTO tenants (id, name, created_at) VALUES ('t1', 'Acme', '2024-01-01T00:00:00.000Z')",
                [],
            )?;
            Err(rusqlite::Error::QueryReturnedNoRows)
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM tenants", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
