use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{OptionalExtension, params};

use super::traits::AgentRepository;
use super::types::AgentRecord;
use super::{SqliteStore, now_db_time};

fn read_agent(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRecord> {
    Ok(AgentRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        persona: row.get(3)?,
        created_at: row.get(4)?,
    })
}

#[async_trait]
impl AgentRepository for SqliteStore {
    async fn create_agent(&self, user_id: &str, name: &str, persona: &str) -> Result<AgentRecord> {
        let record = AgentRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            persona: persona.to_string(),
            created_at: now_db_time(),
        };
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO agents (id, user_id, name, persona, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id,
                record.user_id,
                record.name,
                record.persona,
                record.created_at
            ],
        )?;
        Ok(record)
    }

    async fn list_agents(&self, user_id: &str) -> Result<Vec<AgentRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, user_id, name, persona, created_at FROM agents
             WHERE user_id = ?1 ORDER BY created_at ASC, name ASC",
        )?;
        let rows = stmt.query_map(params![user_id], read_agent)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    async fn get_agent(&self, id: &str) -> Result<Option<AgentRecord>> {
        let db = self.db.lock().await;
        let agent = db
            .query_row(
                "SELECT id, user_id, name, persona, created_at FROM agents WHERE id = ?1",
                params![id],
                read_agent,
            )
            .optional()?;
        Ok(agent)
    }

    async fn delete_agent(&self, user_id: &str, id: &str) -> Result<bool> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let rows = tx.execute(
            "DELETE FROM agents WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        if rows > 0 {
            tx.execute("DELETE FROM chat_messages WHERE agent_id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_store;
    use super::*;

    #[tokio::test]
    async fn agents_are_scoped_to_owner() {
        let store = test_store();
        let agent = store
            .create_agent("alice", "Scheduler", "You book meetings.")
            .await
            .unwrap();
        store.create_agent("bob", "Other", "").await.unwrap();

        let mine = store.list_agents("alice").await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].name, "Scheduler");

        let fetched = store.get_agent(&agent.id).await.unwrap().unwrap();
        assert_eq!(fetched.persona, "You book meetings.");

        assert!(!store.delete_agent("bob", &agent.id).await.unwrap());
        assert!(store.delete_agent("alice", &agent.id).await.unwrap());
        assert!(store.get_agent(&agent.id).await.unwrap().is_none());
    }
}
