mod cron;

pub use cron::{CRON_JOB_NAMES, CronJob, InternalCron, run_cron_job};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::core::integrations::{IntegrationAction, IntegrationExecutor, IntegrationRequest};
use crate::core::store::TaskRepository;
use crate::core::store::types::{NewTask, TaskRecord, TaskStatus};

/// A `running` task whose worker has not reported back within this many
/// minutes is failed so it can be retried.
pub const CLAIM_TIMEOUT_MINUTES: i64 = 15;
pub const MAX_RETENTION_DAYS: i64 = 3650;

const CLAIM_EXPIRED_ERROR: &str = "Worker did not finish the task before its claim expired";

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("{0}")]
    Validation(String),
    #[error("Task '{0}' not found")]
    NotFound(String),
    #[error("Task '{id}' cannot be {action} while {status}")]
    InvalidTransition {
        id: String,
        action: &'static str,
        status: &'static str,
    },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Body of a schedule request. Every field is optional here so validation
/// can name the missing one.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleTaskRequest {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub scheduled_time: Option<String>,
    #[serde(default)]
    pub context: Option<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessSummary {
    pub expired: usize,
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
}

fn required(value: Option<&str>, field: &str) -> Result<String, SchedulerError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| SchedulerError::Validation(format!("{} is required", field)))
}

/// Params handed to the adapter: the task context with the intent merged in.
fn task_params(task: &TaskRecord) -> Value {
    match &task.context {
        Value::Object(map) => {
            let mut params = map.clone();
            params.insert("intent".to_string(), json!(task.intent));
            Value::Object(params)
        }
        Value::Null => json!({ "intent": task.intent }),
        other => json!({ "intent": task.intent, "context": other }),
    }
}

fn task_action(task: &TaskRecord) -> Result<IntegrationAction, String> {
    match task.context.get("action").and_then(Value::as_str) {
        None => Ok(IntegrationAction::Send),
        Some(raw) => match IntegrationAction::parse(raw) {
            Some(action @ (IntegrationAction::Send | IntegrationAction::Fetch)) => Ok(action),
            _ => Err(format!("Unsupported scheduled action '{}'", raw)),
        },
    }
}

/// Persists deferred integration calls and runs the due ones when triggered.
pub struct TaskScheduler {
    tasks: Arc<dyn TaskRepository>,
    executor: Arc<dyn IntegrationExecutor>,
    tools: Vec<String>,
}

impl TaskScheduler {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        executor: Arc<dyn IntegrationExecutor>,
        tools: Vec<String>,
    ) -> Self {
        Self {
            tasks,
            executor,
            tools,
        }
    }

    pub async fn schedule_task(
        &self,
        request: &ScheduleTaskRequest,
        user_id: &str,
    ) -> Result<TaskRecord, SchedulerError> {
        let agent_id = required(request.agent_id.as_deref(), "agentId")?;
        let tool = required(request.tool.as_deref(), "tool")?;
        if !self.tools.iter().any(|t| *t == tool) {
            return Err(SchedulerError::Validation(format!(
                "Unknown tool '{}'",
                tool
            )));
        }
        let intent = required(request.intent.as_deref(), "intent")?;
        let raw_time = required(request.scheduled_time.as_deref(), "scheduledTime")?;
        let scheduled_time = DateTime::parse_from_rfc3339(&raw_time)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| {
                SchedulerError::Validation(
                    "scheduledTime must be an RFC 3339 timestamp".to_string(),
                )
            })?;

        let task = self
            .tasks
            .insert_task(&NewTask {
                agent_id,
                user_id: user_id.to_string(),
                tool,
                intent,
                context: request.context.clone().unwrap_or_else(|| json!({})),
                scheduled_time,
            })
            .await?;
        info!(
            "Scheduled task {} ({} via {}) for {}",
            task.id, task.intent, task.tool, task.scheduled_time
        );
        Ok(task)
    }

    pub async fn get_agent_tasks(
        &self,
        agent_id: &str,
        user_id: Option<&str>,
        status: Option<TaskStatus>,
    ) -> Result<Vec<TaskRecord>, SchedulerError> {
        Ok(self
            .tasks
            .list_agent_tasks(agent_id, user_id, status)
            .await?)
    }

    /// Load a task, hiding tasks owned by someone else.
    async fn owned_task(&self, id: &str, user_id: Option<&str>) -> Result<TaskRecord, SchedulerError> {
        self.tasks
            .get_task(id)
            .await?
            .filter(|t| user_id.is_none_or(|u| t.user_id == u))
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))
    }

    pub async fn cancel_task(&self, id: &str, user_id: Option<&str>) -> Result<(), SchedulerError> {
        self.transition(id, user_id, TaskStatus::Scheduled, TaskStatus::Cancelled, "cancelled")
            .await
    }

    pub async fn retry_task(&self, id: &str, user_id: Option<&str>) -> Result<(), SchedulerError> {
        self.transition(id, user_id, TaskStatus::Failed, TaskStatus::Scheduled, "retried")
            .await
    }

    async fn transition(
        &self,
        id: &str,
        user_id: Option<&str>,
        from: TaskStatus,
        to: TaskStatus,
        action: &'static str,
    ) -> Result<(), SchedulerError> {
        let task = self.owned_task(id, user_id).await?;
        if task.status != from || !self.tasks.transition_task(id, from, to).await? {
            let current = self
                .tasks
                .get_task(id)
                .await?
                .map(|t| t.status)
                .unwrap_or(task.status);
            return Err(SchedulerError::InvalidTransition {
                id: id.to_string(),
                action,
                status: current.as_str(),
            });
        }
        info!("Task {} {}", id, action);
        Ok(())
    }

    /// Fail abandoned claims, then claim every due task and run it once
    /// through the integration layer.
    pub async fn process_due_tasks(&self) -> Result<ProcessSummary, SchedulerError> {
        let now = Utc::now();
        let expired = self
            .tasks
            .expire_stale_claims(now - Duration::minutes(CLAIM_TIMEOUT_MINUTES), CLAIM_EXPIRED_ERROR)
            .await?;
        if expired > 0 {
            warn!("Failed {} task(s) whose worker claim expired", expired);
        }

        let worker_token = uuid::Uuid::new_v4().to_string();
        let claimed = self.tasks.claim_due_tasks(now, &worker_token).await?;
        let mut summary = ProcessSummary {
            expired,
            claimed: claimed.len(),
            ..Default::default()
        };

        for task in claimed {
            let (status, result, error) = match task_action(&task) {
                Err(message) => (TaskStatus::Failed, None, Some(message)),
                Ok(action) => {
                    let outcome = self
                        .executor
                        .execute_integration(IntegrationRequest {
                            tool: task.tool.clone(),
                            action,
                            params: task_params(&task),
                            user_id: task.user_id.clone(),
                            agent_id: Some(task.agent_id.clone()),
                        })
                        .await;
                    if outcome.success {
                        (TaskStatus::Completed, outcome.data, None)
                    } else {
                        let error = outcome
                            .error
                            .unwrap_or_else(|| "Integration failed".to_string());
                        (TaskStatus::Failed, None, Some(error))
                    }
                }
            };

            let written = self
                .tasks
                .finish_task(
                    &task.id,
                    &worker_token,
                    status,
                    result.as_ref(),
                    error.as_deref(),
                )
                .await;
            match written {
                Ok(true) if status == TaskStatus::Completed => summary.completed += 1,
                Ok(true) => summary.failed += 1,
                Ok(false) => {
                    warn!("Task {} was no longer held by this worker", task.id);
                    summary.failed += 1;
                }
                // left running; the claim timeout fails it later
                Err(e) => {
                    error!("Failed to record outcome of task {}: {:#}", task.id, e);
                    summary.failed += 1;
                }
            }
        }

        if summary.claimed > 0 {
            info!(
                "Processed {} due task(s): {} completed, {} failed",
                summary.claimed, summary.completed, summary.failed
            );
        }
        Ok(summary)
    }

    pub async fn cleanup_completed_tasks(&self, retention_days: i64) -> Result<usize, SchedulerError> {
        if retention_days < 0 {
            return Err(SchedulerError::Validation(
                "retentionDays must not be negative".to_string(),
            ));
        }
        if retention_days > MAX_RETENTION_DAYS {
            return Err(SchedulerError::Validation(format!(
                "retentionDays must be at most {}",
                MAX_RETENTION_DAYS
            )));
        }
        let cutoff = Utc::now()
            .checked_sub_signed(Duration::days(retention_days))
            .ok_or_else(|| SchedulerError::Validation("retentionDays is out of range".to_string()))?;
        let deleted = self.tasks.delete_completed_tasks_before(cutoff).await?;
        if deleted > 0 {
            info!("Removed {} completed task(s) older than {} days", deleted, retention_days);
        }
        Ok(deleted)
    }
}
