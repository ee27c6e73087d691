use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{OptionalExtension, params};
use sha2::{Digest, Sha256};

use super::traits::ApiTokenRepository;
use super::types::ApiTokenRecord;
use super::{SqliteStore, now_db_time};

pub(crate) fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_raw_token() -> String {
    let bytes: [u8; 24] = rand::random();
    format!("apk_{}", hex::encode(bytes))
}

#[async_trait]
impl ApiTokenRepository for SqliteStore {
    async fn create_api_token(&self, user_id: &str, name: &str) -> Result<(String, ApiTokenRecord)> {
        let raw_token = generate_raw_token();
        let token_hash = hash_token(&raw_token);
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = now_db_time();

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO api_tokens (id, user_id, name, token_hash, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, user_id, name, token_hash, created_at],
        )?;

        Ok((
            raw_token,
            ApiTokenRecord {
                id,
                user_id: user_id.to_string(),
                name: name.to_string(),
                created_at,
            },
        ))
    }

    async fn list_api_tokens(&self, user_id: &str) -> Result<Vec<ApiTokenRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, user_id, name, created_at FROM api_tokens WHERE user_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(ApiTokenRecord {
                id: row.get(0)?,
                user_id: row.get(1)?,
                name: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        let mut tokens = Vec::new();
        for row in rows {
            tokens.push(row?);
        }
        Ok(tokens)
    }

    async fn delete_api_token(&self, user_id: &str, id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "DELETE FROM api_tokens WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(rows > 0)
    }

    async fn resolve_api_token(&self, raw_token: &str) -> Result<Option<String>> {
        let token_hash = hash_token(raw_token);
        let db = self.db.lock().await;
        let user_id = db
            .query_row(
                "SELECT user_id FROM api_tokens WHERE token_hash = ?1",
                params![token_hash],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(user_id)
    }
}
