use anyhow::Result;
use async_trait::async_trait;
use rusqlite::params;

use super::traits::ChatRepository;
use super::types::ChatMessageRecord;
use super::{SqliteStore, now_db_time};

#[async_trait]
impl ChatRepository for SqliteStore {
    async fn append_chat_messages(
        &self,
        agent_id: &str,
        user_id: &str,
        messages: &[(&str, &str)],
    ) -> Result<()> {
        let now = now_db_time();
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chat_messages (agent_id, user_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (role, content) in messages {
                stmt.execute(params![agent_id, user_id, role, content, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn list_chat_messages(
        &self,
        agent_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessageRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, agent_id, role, content, created_at FROM (
                SELECT id, agent_id, role, content, created_at FROM chat_messages
                WHERE agent_id = ?1 ORDER BY id DESC LIMIT ?2
             ) ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![agent_id, limit as i64], |row| {
            Ok(ChatMessageRecord {
                id: row.get(0)?,
                agent_id: row.get(1)?,
                role: row.get(2)?,
                content: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_store;
    use super::*;

    #[tokio::test]
    async fn history_returns_latest_messages_in_order() {
        let store = test_store();
        store
            .append_chat_messages("a1", "alice", &[("user", "hi"), ("assistant", "hello")])
            .await
            .unwrap();
        store
            .append_chat_messages("a1", "alice", &[("user", "again"), ("assistant", "yes?")])
            .await
            .unwrap();
        store
            .append_chat_messages("a2", "alice", &[("user", "elsewhere")])
            .await
            .unwrap();

        let recent = store.list_chat_messages("a1", 3).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hello", "again", "yes?"]);
        assert_eq!(store.list_chat_messages("a2", 10).await.unwrap().len(), 1);
    }
}
