use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;

use super::traits::TaskRepository;
use super::types::{NewTask, TaskRecord, TaskStatus};
use super::{SqliteStore, from_db_time, now_db_time, to_db_time};

const SELECT_COLUMNS: &str = "SELECT id, agent_id, user_id, tool, intent, context, scheduled_time, status, result, error, created_at, updated_at
     FROM scheduled_tasks";

fn conversion_error(msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        msg.into(),
    )
}

fn read_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRecord> {
    let context: String = row.get(5)?;
    let scheduled_time: String = row.get(6)?;
    let status: String = row.get(7)?;
    let result: Option<String> = row.get(8)?;

    Ok(TaskRecord {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        user_id: row.get(2)?,
        tool: row.get(3)?,
        intent: row.get(4)?,
        context: serde_json::from_str(&context).unwrap_or(serde_json::Value::Null),
        scheduled_time: from_db_time(&scheduled_time)?,
        status: TaskStatus::from_status(&status)
            .ok_or_else(|| conversion_error(format!("unknown task status '{}'", status)))?,
        result: result.and_then(|r| serde_json::from_str(&r).ok()),
        error: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

#[async_trait]
impl TaskRepository for SqliteStore {
    async fn insert_task(&self, task: &NewTask) -> Result<TaskRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_db_time();
        let context = serde_json::to_string(&task.context)?;

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO scheduled_tasks
                (id, agent_id, user_id, tool, intent, context, scheduled_time, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'scheduled', ?8, ?8)",
            params![
                id,
                task.agent_id,
                task.user_id,
                task.tool,
                task.intent,
                context,
                to_db_time(task.scheduled_time),
                now
            ],
        )?;
        let rec = db.query_row(
            &format!("{} WHERE id = ?1", SELECT_COLUMNS),
            params![id],
            read_task,
        )?;
        Ok(rec)
    }

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!("{} WHERE id = ?1 LIMIT 1", SELECT_COLUMNS))?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(read_task(row)?))
        } else {
            Ok(None)
        }
    }

    async fn list_agent_tasks(
        &self,
        agent_id: &str,
        user_id: Option<&str>,
        status: Option<TaskStatus>,
    ) -> Result<Vec<TaskRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "{} WHERE agent_id = ?1
               AND (?2 IS NULL OR user_id = ?2)
               AND (?3 IS NULL OR status = ?3)
             ORDER BY scheduled_time ASC, created_at ASC",
            SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![agent_id, user_id, status.map(|s| s.as_str())],
            read_task,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    async fn transition_task(&self, id: &str, from: TaskStatus, to: TaskStatus) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = if to == TaskStatus::Scheduled {
            db.execute(
                "UPDATE scheduled_tasks
                 SET status = ?1, result = NULL, error = NULL, worker_token = NULL, updated_at = ?2
                 WHERE id = ?3 AND status = ?4",
                params![to.as_str(), now_db_time(), id, from.as_str()],
            )?
        } else {
            db.execute(
                "UPDATE scheduled_tasks SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![to.as_str(), now_db_time(), id, from.as_str()],
            )?
        };
        Ok(rows > 0)
    }

    async fn claim_due_tasks(
        &self,
        now: DateTime<Utc>,
        worker_token: &str,
    ) -> Result<Vec<TaskRecord>> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE scheduled_tasks
             SET status = 'running', worker_token = ?1, updated_at = ?2
             WHERE status = 'scheduled' AND scheduled_time <= ?3",
            params![worker_token, now_db_time(), to_db_time(now)],
        )?;
        let mut stmt = db.prepare(&format!(
            "{} WHERE worker_token = ?1 AND status = 'running' ORDER BY scheduled_time ASC",
            SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![worker_token], read_task)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    async fn finish_task(
        &self,
        id: &str,
        worker_token: &str,
        status: TaskStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<bool> {
        let result = result.map(serde_json::to_string).transpose()?;
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE scheduled_tasks
             SET status = ?1, result = ?2, error = ?3, updated_at = ?4
             WHERE id = ?5 AND worker_token = ?6 AND status = 'running'",
            params![status.as_str(), result, error, now_db_time(), id, worker_token],
        )?;
        Ok(rows > 0)
    }

    async fn expire_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
        error: &str,
    ) -> Result<usize> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE scheduled_tasks
             SET status = 'failed', error = ?1, worker_token = NULL, updated_at = ?2
             WHERE status = 'running' AND updated_at <= ?3",
            params![error, now_db_time(), to_db_time(claimed_before)],
        )?;
        Ok(rows)
    }

    async fn delete_completed_tasks_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "DELETE FROM scheduled_tasks WHERE status = 'completed' AND updated_at <= ?1",
            params![to_db_time(cutoff)],
        )?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_store;
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn new_task(agent: &str, at: DateTime<Utc>) -> NewTask {
        NewTask {
            agent_id: agent.to_string(),
            user_id: "alice".to_string(),
            tool: "gmail".to_string(),
            intent: "send_email".to_string(),
            context: json!({ "to": "bob@example.com" }),
            scheduled_time: at,
        }
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let store = test_store();
        let at = Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap();
        let task = store.insert_task(&new_task("a1", at)).await.unwrap();
        assert_eq!(task.status, TaskStatus::Scheduled);
        assert_eq!(task.scheduled_time, at);
        let fetched = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(fetched.context["to"], "bob@example.com");
        assert!(store.get_task("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_orders_by_scheduled_time_and_filters() {
        let store = test_store();
        let base = Utc::now();
        let late = store.insert_task(&new_task("a1", base + Duration::hours(2))).await.unwrap();
        let early = store.insert_task(&new_task("a1", base + Duration::hours(1))).await.unwrap();
        store.insert_task(&new_task("a2", base)).await.unwrap();

        let tasks = store.list_agent_tasks("a1", None, None).await.unwrap();
        let ids: Vec<_> = tasks.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec![early.id.clone(), late.id.clone()]);

        assert!(store.transition_task(&early.id, TaskStatus::Scheduled, TaskStatus::Cancelled).await.unwrap());
        let scheduled = store
            .list_agent_tasks("a1", None, Some(TaskStatus::Scheduled))
            .await
            .unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].id, late.id);

        assert!(store.list_agent_tasks("a1", Some("bob"), None).await.unwrap().is_empty());
        assert_eq!(store.list_agent_tasks("a1", Some("alice"), None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn transition_requires_expected_status() {
        let store = test_store();
        let task = store.insert_task(&new_task("a1", Utc::now())).await.unwrap();
        assert!(!store.transition_task(&task.id, TaskStatus::Failed, TaskStatus::Scheduled).await.unwrap());
        assert!(!store.transition_task("ghost", TaskStatus::Scheduled, TaskStatus::Cancelled).await.unwrap());
        let unchanged = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, TaskStatus::Scheduled);
    }

    #[tokio::test]
    async fn claim_takes_only_due_tasks_once() {
        let store = test_store();
        let now = Utc::now();
        let due = store.insert_task(&new_task("a1", now - Duration::minutes(5))).await.unwrap();
        store.insert_task(&new_task("a1", now + Duration::hours(1))).await.unwrap();

        let first = store.claim_due_tasks(now, "worker-1").await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, due.id);
        assert_eq!(first[0].status, TaskStatus::Running);

        let second = store.claim_due_tasks(now, "worker-2").await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn finish_requires_claiming_worker() {
        let store = test_store();
        let now = Utc::now();
        let task = store.insert_task(&new_task("a1", now - Duration::minutes(1))).await.unwrap();
        store.claim_due_tasks(now, "worker-1").await.unwrap();

        let result = json!({ "messageId": "m-1" });
        assert!(!store.finish_task(&task.id, "worker-2", TaskStatus::Completed, Some(&result), None).await.unwrap());
        assert!(store.finish_task(&task.id, "worker-1", TaskStatus::Completed, Some(&result), None).await.unwrap());

        let done = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.result.unwrap()["messageId"], "m-1");
    }

    #[tokio::test]
    async fn retry_transition_clears_outcome() {
        let store = test_store();
        let now = Utc::now();
        let task = store.insert_task(&new_task("a1", now - Duration::minutes(1))).await.unwrap();
        store.claim_due_tasks(now, "w").await.unwrap();
        store.finish_task(&task.id, "w", TaskStatus::Failed, None, Some("boom")).await.unwrap();
        assert!(store.transition_task(&task.id, TaskStatus::Failed, TaskStatus::Scheduled).await.unwrap());
        let retried = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(retried.status, TaskStatus::Scheduled);
        assert!(retried.error.is_none());
    }

    #[tokio::test]
    async fn stale_claims_expire_to_failed() {
        let store = test_store();
        let now = Utc::now();
        let task = store.insert_task(&new_task("a1", now - Duration::minutes(1))).await.unwrap();
        store.claim_due_tasks(now, "dead-worker").await.unwrap();

        assert_eq!(
            store
                .expire_stale_claims(now - Duration::minutes(15), "claim expired")
                .await
                .unwrap(),
            0
        );
        let expired = store
            .expire_stale_claims(Utc::now() + Duration::seconds(1), "claim expired")
            .await
            .unwrap();
        assert_eq!(expired, 1);

        let failed = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("claim expired"));
        // the dead worker can no longer write its outcome
        assert!(!store.finish_task(&task.id, "dead-worker", TaskStatus::Completed, None, None).await.unwrap());
    }

    #[tokio::test]
    async fn delete_completed_respects_cutoff_and_status() {
        let store = test_store();
        let now = Utc::now();
        let done = store.insert_task(&new_task("a1", now - Duration::minutes(1))).await.unwrap();
        let failed = store.insert_task(&new_task("a1", now - Duration::minutes(1))).await.unwrap();
        store.claim_due_tasks(now, "w").await.unwrap();
        store.finish_task(&done.id, "w", TaskStatus::Completed, None, None).await.unwrap();
        store.finish_task(&failed.id, "w", TaskStatus::Failed, None, Some("x")).await.unwrap();

        assert_eq!(store.delete_completed_tasks_before(now - Duration::days(1)).await.unwrap(), 0);
        let deleted = store
            .delete_completed_tasks_before(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_task(&done.id).await.unwrap().is_none());
        assert!(store.get_task(&failed.id).await.unwrap().is_some());
    }
}
