use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{OptionalExtension, params};

use super::traits::FallbackRepository;
use super::types::FallbackRecord;
use super::{SqliteStore, now_db_time};

/// Tool-wide rows use an empty agent key so the composite primary key works.
fn agent_key(agent_id: Option<&str>) -> &str {
    agent_id.unwrap_or("")
}

#[async_trait]
impl FallbackRepository for SqliteStore {
    async fn get_fallback(
        &self,
        tool: &str,
        agent_id: Option<&str>,
    ) -> Result<Option<FallbackRecord>> {
        let db = self.db.lock().await;
        let record = db
            .query_row(
                "SELECT tool, agent_key, message, updated_by, updated_at
                 FROM fallback_messages WHERE tool = ?1 AND agent_key = ?2",
                params![tool, agent_key(agent_id)],
                |row| {
                    let key: String = row.get(1)?;
                    Ok(FallbackRecord {
                        tool: row.get(0)?,
                        agent_id: if key.is_empty() { None } else { Some(key) },
                        message: row.get(2)?,
                        updated_by: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    async fn upsert_fallback(
        &self,
        tool: &str,
        agent_id: Option<&str>,
        message: &str,
        updated_by: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO fallback_messages (tool, agent_key, message, updated_by, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(tool, agent_key) DO UPDATE SET
                message = excluded.message,
                updated_by = excluded.updated_by,
                updated_at = excluded.updated_at",
            params![tool, agent_key(agent_id), message, updated_by, now_db_time()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_store;
    use super::*;

    #[tokio::test]
    async fn tool_wide_and_agent_rows_are_distinct() {
        let store = test_store();
        store
            .upsert_fallback("gmail", None, "Email is down", Some("admin"))
            .await
            .unwrap();
        store
            .upsert_fallback("gmail", Some("agent-1"), "Agent 1 cannot email", None)
            .await
            .unwrap();

        let wide = store.get_fallback("gmail", None).await.unwrap().unwrap();
        assert_eq!(wide.message, "Email is down");
        assert!(wide.agent_id.is_none());
        assert_eq!(wide.updated_by.as_deref(), Some("admin"));

        let agent = store.get_fallback("gmail", Some("agent-1")).await.unwrap().unwrap();
        assert_eq!(agent.agent_id.as_deref(), Some("agent-1"));

        assert!(store.get_fallback("gmail", Some("agent-2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_message() {
        let store = test_store();
        store.upsert_fallback("slack", None, "first", None).await.unwrap();
        store.upsert_fallback("slack", None, "second", Some("ops")).await.unwrap();
        let rec = store.get_fallback("slack", None).await.unwrap().unwrap();
        assert_eq!(rec.message, "second");
        assert_eq!(rec.updated_by.as_deref(), Some("ops"));
    }
}
