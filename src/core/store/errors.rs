use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;

use super::traits::ErrorRepository;
use super::types::ErrorRecord;
use super::{SqliteStore, to_db_time};

fn read_error(row: &rusqlite::Row<'_>) -> rusqlite::Result<ErrorRecord> {
    Ok(ErrorRecord {
        id: row.get(0)?,
        tool: row.get(1)?,
        agent_id: row.get(2)?,
        error_code: row.get(3)?,
        message: row.get(4)?,
        created_at: row.get(5)?,
        resolved: row.get::<_, i64>(6)? != 0,
    })
}

fn collect_counts(
    stmt: &mut rusqlite::Statement<'_>,
    params: impl rusqlite::Params,
) -> Result<Vec<(String, i64)>> {
    let rows = stmt.query_map(params, |row| Ok((row.get(0)?, row.get(1)?)))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[async_trait]
impl ErrorRepository for SqliteStore {
    async fn insert_error(
        &self,
        tool: &str,
        agent_id: Option<&str>,
        error_code: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<ErrorRecord> {
        let record = ErrorRecord {
            id: uuid::Uuid::new_v4().to_string(),
            tool: tool.to_string(),
            agent_id: agent_id.map(str::to_string),
            error_code: error_code.to_string(),
            message: message.to_string(),
            created_at: to_db_time(at),
            resolved: false,
        };
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO error_records (id, tool, agent_id, error_code, message, created_at, resolved)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                record.id,
                record.tool,
                record.agent_id,
                record.error_code,
                record.message,
                record.created_at
            ],
        )?;
        Ok(record)
    }

    async fn list_errors(
        &self,
        limit: usize,
        tool: Option<&str>,
        include_resolved: bool,
    ) -> Result<Vec<ErrorRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, tool, agent_id, error_code, message, created_at, resolved
             FROM error_records
             WHERE (?1 IS NULL OR tool = ?1) AND (?2 = 1 OR resolved = 0)
             ORDER BY created_at DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![tool, include_resolved as i64, limit as i64],
            read_error,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    async fn count_errors_by_day(
        &self,
        since: DateTime<Utc>,
        tool: Option<&str>,
    ) -> Result<Vec<(String, i64)>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT substr(created_at, 1, 10) AS day, COUNT(*)
             FROM error_records
             WHERE created_at >= ?1 AND (?2 IS NULL OR tool = ?2)
             GROUP BY day
             ORDER BY day ASC",
        )?;
        collect_counts(&mut stmt, params![to_db_time(since), tool])
    }

    async fn count_errors_by_tool(&self, since: DateTime<Utc>) -> Result<Vec<(String, i64)>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT tool, COUNT(*) AS n
             FROM error_records
             WHERE created_at >= ?1
             GROUP BY tool
             ORDER BY n DESC, tool ASC",
        )?;
        collect_counts(&mut stmt, params![to_db_time(since)])
    }

    async fn count_errors_by_code(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(String, i64)>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT error_code, COUNT(*) AS n
             FROM error_records
             WHERE created_at >= ?1
             GROUP BY error_code
             ORDER BY n DESC, error_code ASC
             LIMIT ?2",
        )?;
        collect_counts(&mut stmt, params![to_db_time(since), limit as i64])
    }

    async fn resolve_errors(&self, ids: &[String]) -> Result<usize> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let mut matched = 0;
        {
            let mut stmt = tx.prepare("UPDATE error_records SET resolved = 1 WHERE id = ?1")?;
            for id in ids {
                matched += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_store;
    use super::*;
    use chrono::{Duration, TimeZone};

    #[tokio::test]
    async fn list_filters_by_tool_and_resolution() {
        let store = test_store();
        let now = Utc::now();
        let a = store
            .insert_error("gmail", None, "TOKEN_EXPIRED", "expired", now)
            .await
            .unwrap();
        store
            .insert_error("slack", Some("agent-1"), "UPSTREAM_ERROR", "500", now)
            .await
            .unwrap();

        assert_eq!(store.list_errors(10, None, false).await.unwrap().len(), 2);
        assert_eq!(store.list_errors(10, Some("gmail"), false).await.unwrap().len(), 1);

        store.resolve_errors(&[a.id.clone()]).await.unwrap();
        assert_eq!(store.list_errors(10, None, false).await.unwrap().len(), 1);
        let all = store.list_errors(10, None, true).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|e| e.id == a.id && e.resolved));
    }

    #[tokio::test]
    async fn counts_group_by_day_tool_and_code() {
        let store = test_store();
        let d1 = Utc.with_ymd_and_hms(2024, 3, 18, 10, 0, 0).unwrap();
        let d2 = Utc.with_ymd_and_hms(2024, 3, 19, 23, 59, 0).unwrap();
        store.insert_error("gmail", None, "A", "m", d1).await.unwrap();
        store.insert_error("gmail", None, "B", "m", d2).await.unwrap();
        store.insert_error("slack", None, "B", "m", d2).await.unwrap();
        store
            .insert_error("slack", None, "C", "m", d1 - Duration::days(30))
            .await
            .unwrap();

        let since = d1 - Duration::days(1);
        let by_day = store.count_errors_by_day(since, None).await.unwrap();
        assert_eq!(
            by_day,
            vec![("2024-03-18".to_string(), 1), ("2024-03-19".to_string(), 2)]
        );
        let slack_days = store.count_errors_by_day(since, Some("slack")).await.unwrap();
        assert_eq!(slack_days, vec![("2024-03-19".to_string(), 1)]);

        let by_tool = store.count_errors_by_tool(since).await.unwrap();
        assert_eq!(by_tool, vec![("gmail".to_string(), 2), ("slack".to_string(), 1)]);

        let by_code = store.count_errors_by_code(since, 1).await.unwrap();
        assert_eq!(by_code, vec![("B".to_string(), 2)]);
    }

    #[tokio::test]
    async fn resolve_skips_unknown_ids() {
        let store = test_store();
        let rec = store
            .insert_error("asana", None, "X", "m", Utc::now())
            .await
            .unwrap();
        let matched = store
            .resolve_errors(&[rec.id.clone(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(matched, 1);
    }
}
