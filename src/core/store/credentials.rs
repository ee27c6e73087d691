use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::warn;

use super::traits::CredentialRepository;
use super::types::{CredentialRecord, CredentialStatus, NewCredential};
use super::{SqliteStore, from_db_time, now_db_time, to_db_time};

/// Raw row before decryption.
struct StoredCredential {
    user_id: String,
    tool_name: String,
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<String>,
    scopes: String,
    status: String,
    updated_at: String,
}

const SELECT_COLUMNS: &str = "SELECT user_id, tool_name, access_token, refresh_token, expires_at, scopes, status, updated_at
     FROM integration_credentials";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredCredential> {
    Ok(StoredCredential {
        user_id: row.get(0)?,
        tool_name: row.get(1)?,
        access_token: row.get(2)?,
        refresh_token: row.get(3)?,
        expires_at: row.get(4)?,
        scopes: row.get(5)?,
        status: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

impl SqliteStore {
    fn decrypt_optional(&self, value: Option<&str>) -> Result<Option<String>> {
        match value {
            Some(v) if !v.is_empty() => Ok(Some(self.cipher.decrypt(v)?)),
            _ => Ok(None),
        }
    }

    fn into_record(&self, stored: StoredCredential) -> Result<CredentialRecord> {
        let access_token = self
            .decrypt_optional(Some(&stored.access_token))?
            .unwrap_or_default();
        let refresh_token = self.decrypt_optional(stored.refresh_token.as_deref())?;
        let expires_at = match stored.expires_at.as_deref() {
            Some(raw) => Some(from_db_time(raw)?),
            None => None,
        };
        let scopes: Vec<String> = serde_json::from_str(&stored.scopes).unwrap_or_default();
        let status = CredentialStatus::from_status(&stored.status).unwrap_or_else(|| {
            warn!(
                "Credential {}/{} has unknown status '{}'",
                stored.user_id, stored.tool_name, stored.status
            );
            CredentialStatus::Error
        });

        Ok(CredentialRecord {
            user_id: stored.user_id,
            tool_name: stored.tool_name,
            access_token,
            refresh_token,
            expires_at,
            scopes,
            status,
            updated_at: stored.updated_at,
        })
    }
}

#[async_trait]
impl CredentialRepository for SqliteStore {
    async fn upsert_credential(&self, credential: &NewCredential) -> Result<()> {
        let access = self.cipher.encrypt(&credential.access_token)?;
        let refresh = match credential.refresh_token.as_deref() {
            Some(token) => Some(self.cipher.encrypt(token)?),
            None => None,
        };
        let expires_at = credential.expires_at.map(to_db_time);
        let scopes = serde_json::to_string(&credential.scopes)?;
        let now = now_db_time();

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO integration_credentials
                (user_id, tool_name, access_token, refresh_token, expires_at, scopes, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', ?7, ?7)
             ON CONFLICT(user_id, tool_name) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = COALESCE(excluded.refresh_token, integration_credentials.refresh_token),
                expires_at = excluded.expires_at,
                scopes = excluded.scopes,
                status = 'active',
                updated_at = excluded.updated_at",
            params![
                credential.user_id,
                credential.tool_name,
                access,
                refresh,
                expires_at,
                scopes,
                now
            ],
        )?;
        Ok(())
    }

    async fn get_credential(&self, user_id: &str, tool: &str) -> Result<Option<CredentialRecord>> {
        let stored = {
            let db = self.db.lock().await;
            let mut stmt = db.prepare(&format!(
                "{} WHERE user_id = ?1 AND tool_name = ?2 LIMIT 1",
                SELECT_COLUMNS
            ))?;
            let mut rows = stmt.query(params![user_id, tool])?;
            match rows.next()? {
                Some(row) => Some(read_row(row)?),
                None => None,
            }
        };
        stored.map(|s| self.into_record(s)).transpose()
    }

    async fn update_credential_tokens(
        &self,
        user_id: &str,
        tool: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let access = self.cipher.encrypt(access_token)?;
        let refresh = match refresh_token {
            Some(token) => Some(self.cipher.encrypt(token)?),
            None => None,
        };
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE integration_credentials SET
                access_token = ?1,
                refresh_token = COALESCE(?2, refresh_token),
                expires_at = ?3,
                status = 'active',
                updated_at = ?4
             WHERE user_id = ?5 AND tool_name = ?6",
            params![
                access,
                refresh,
                expires_at.map(to_db_time),
                now_db_time(),
                user_id,
                tool
            ],
        )?;
        Ok(rows > 0)
    }

    async fn set_credential_status(
        &self,
        user_id: &str,
        tool: &str,
        status: CredentialStatus,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE integration_credentials SET status = ?1, updated_at = ?2 WHERE user_id = ?3 AND tool_name = ?4",
            params![status.as_str(), now_db_time(), user_id, tool],
        )?;
        Ok(rows > 0)
    }

    async fn revoke_credential(&self, user_id: &str, tool: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE integration_credentials SET
                status = 'revoked', access_token = '', refresh_token = NULL, expires_at = NULL, updated_at = ?1
             WHERE user_id = ?2 AND tool_name = ?3",
            params![now_db_time(), user_id, tool],
        )?;
        Ok(rows > 0)
    }
}
