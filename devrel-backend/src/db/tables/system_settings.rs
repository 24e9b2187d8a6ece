//! Per-tenant system settings and per-user dashboard settings
//!
//! Secret fields (SMTP password, S3 secret key, AI api key) are encrypted
//! before they reach this table and decrypted only in
//! `get_decrypted_system_settings`.

use rusqlite::{OptionalExtension, Result as SqliteResult};

use crate::crypto::SecretCipher;
use crate::db::{now_ts, opt_ts_col};
use crate::errors::{ServiceError, ServiceResult};
use crate::models::system_settings::{blank_to_none, UpdateSystemSettingsRequest};
use crate::models::SystemSettings;
use super::super::Database;

fn to_json<T: serde::Serialize>(value: &T) -> ServiceResult<String> {
    serde_json::to_string(value).map_err(|e| ServiceError::Internal(e.to_string()))
}

fn section<T: serde::de::DeserializeOwned + Default>(raw: &str) -> T {
    serde_json::from_str(raw).unwrap_or_default()
}

/// `None` keeps the stored value, empty clears, anything else replaces
fn merge_plain(current: &mut Option<String>, update: &Option<String>) {
    if let Some(value) = update {
        *current = blank_to_none(value);
    }
}

fn merge_secret(current: &mut Option<String>, update: &Option<String>, cipher: &SecretCipher) -> ServiceResult<()> {
    if let Some(value) = update {
        *current = match blank_to_none(value) {
            Some(plaintext) => Some(cipher.encrypt(&plaintext)?),
            None => None,
        };
    }
    Ok(())
}

impl Database {
    /// Stored settings with secrets still encrypted; defaults when never saved
    pub fn get_system_settings(&self, tenant_id: &str) -> SqliteResult<SystemSettings> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT smtp, s3, ai, updated_at FROM system_settings WHERE tenant_id = ?1",
                [tenant_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        opt_ts_col(row, 3)?,
                    ))
                },
            )
            .optional()?;

        Ok(match row {
            Some((smtp, s3, ai, updated_at)) => SystemSettings {
                smtp: section(&smtp),
                s3: section(&s3),
                ai: section(&ai),
                updated_at,
            },
            None => SystemSettings::default(),
        })
    }

    /// Merge a partial update, encrypting secret fields, and persist it
    pub fn update_system_settings(
        &self,
        tenant_id: &str,
        req: &UpdateSystemSettingsRequest,
        cipher: &SecretCipher,
    ) -> ServiceResult<SystemSettings> {
        let mut settings = self.get_system_settings(tenant_id)?;

        if let Some(smtp) = &req.smtp {
            merge_plain(&mut settings.smtp.host, &smtp.host);
            merge_plain(&mut settings.smtp.username, &smtp.username);
            merge_plain(&mut settings.smtp.from_address, &smtp.from_address);
            merge_secret(&mut settings.smtp.password, &smtp.password, cipher)?;
            if let Some(port) = smtp.port {
                settings.smtp.port = u16::try_from(port).ok();
            }
            if let Some(use_tls) = smtp.use_tls {
                settings.smtp.use_tls = use_tls;
            }
        }
        if let Some(s3) = &req.s3 {
            merge_plain(&mut settings.s3.bucket, &s3.bucket);
            merge_plain(&mut settings.s3.region, &s3.region);
            merge_plain(&mut settings.s3.endpoint, &s3.endpoint);
            merge_plain(&mut settings.s3.access_key_id, &s3.access_key_id);
            merge_secret(&mut settings.s3.secret_access_key, &s3.secret_access_key, cipher)?;
        }
        if let Some(ai) = &req.ai {
            merge_plain(&mut settings.ai.provider, &ai.provider);
            merge_plain(&mut settings.ai.model, &ai.model);
            merge_plain(&mut settings.ai.base_url, &ai.base_url);
            merge_secret(&mut settings.ai.api_key, &ai.api_key, cipher)?;
        }

        let smtp = to_json(&settings.smtp)?;
        let s3 = to_json(&settings.s3)?;
        let ai = to_json(&settings.ai)?;
        {
            let conn = self.conn();
            let now = now_ts();
            conn.execute(
                "INSERT INTO system_settings (tenant_id, smtp, s3, ai, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(tenant_id) DO UPDATE SET smtp = excluded.smtp, s3 = excluded.s3, ai = excluded.ai,
                                                      updated_at = excluded.updated_at",
                rusqlite::params![tenant_id, &smtp, &s3, &ai, &now],
            )?;
        }

        Ok(self.get_system_settings(tenant_id)?)
    }

    /// Plaintext secrets for point-of-use consumers (mailer, storage, AI client).
    /// Never return this from an API handler.
    pub fn get_decrypted_system_settings(&self, tenant_id: &str, cipher: &SecretCipher) -> ServiceResult<SystemSettings> {
        let mut settings = self.get_system_settings(tenant_id)?;
        for secret in [
            &mut settings.smtp.password,
            &mut settings.s3.secret_access_key,
            &mut settings.ai.api_key,
        ] {
            if let Some(ciphertext) = secret.as_deref() {
                *secret = Some(cipher.decrypt(ciphertext)?);
            }
        }
        Ok(settings)
    }

    // ============================================
    // User settings (dashboard layout)
    // ============================================

    pub fn get_dashboard_layout(&self, user_id: &str) -> SqliteResult<Option<String>> {
        let conn = self.conn();
        let layout: Option<Option<String>> = conn
            .query_row(
                "SELECT dashboard_layout FROM user_settings WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(layout.flatten())
    }

    pub fn save_dashboard_layout(&self, tenant_id: &str, user_id: &str, layout_json: &str) -> SqliteResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO user_settings (user_id, tenant_id, dashboard_layout, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET dashboard_layout = excluded.dashboard_layout, updated_at = excluded.updated_at",
            [user_id, tenant_id, layout_json, now_ts().as_str()],
        )?;
        Ok(())
    }
}
