use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;

use super::traits::OAuthStateRepository;
use super::types::OAuthStateRecord;
use super::{SqliteStore, to_db_time};

#[async_trait]
impl OAuthStateRepository for SqliteStore {
    async fn insert_oauth_state(&self, state: &OAuthStateRecord) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO oauth_states (csrf_token, user_id, tool_name, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                state.csrf_token,
                state.user_id,
                state.tool_name,
                to_db_time(state.expires_at)
            ],
        )?;
        Ok(())
    }

    async fn take_oauth_state(
        &self,
        csrf_token: &str,
        user_id: &str,
        tool: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "DELETE FROM oauth_states
             WHERE csrf_token = ?1 AND user_id = ?2 AND tool_name = ?3 AND expires_at > ?4",
            params![csrf_token, user_id, tool, to_db_time(now)],
        )?;
        Ok(rows > 0)
    }

    async fn purge_expired_oauth_states(&self, now: DateTime<Utc>) -> Result<usize> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "DELETE FROM oauth_states WHERE expires_at <= ?1",
            params![to_db_time(now)],
        )?;
        Ok(rows)
    }
}
