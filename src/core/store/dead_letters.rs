use anyhow::Result;
use async_trait::async_trait;
use rusqlite::params;

use super::traits::DeadLetterRepository;
use super::types::DeadLetterRecord;
use super::{SqliteStore, now_db_time};

#[async_trait]
impl DeadLetterRepository for SqliteStore {
    async fn insert_dead_letter(&self, kind: &str, payload: &str, error: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO dead_letters (kind, payload, error, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![kind, payload, error, now_db_time()],
        )?;
        Ok(())
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, kind, payload, error, created_at FROM dead_letters ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(DeadLetterRecord {
                id: row.get(0)?,
                kind: row.get(1)?,
                payload: row.get(2)?,
                error: row.get(3)?,
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
    async fn dead_letters_list_newest_first() {
        let store = test_store();
        store.insert_dead_letter("chat_history", "{\"n\":1}", "disk full").await.unwrap();
        store.insert_dead_letter("chat_history", "{\"n\":2}", "disk full").await.unwrap();
        let letters = store.list_dead_letters(10).await.unwrap();
        assert_eq!(letters.len(), 2);
        assert_eq!(letters[0].payload, "{\"n\":2}");
        assert_eq!(store.list_dead_letters(1).await.unwrap().len(), 1);
    }
}
