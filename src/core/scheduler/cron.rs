use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use uuid::Uuid;

use super::{SchedulerError, TaskScheduler};
use crate::core::lifecycle::LifecycleComponent;

/// Jobs the cron trigger can run. Two names map to due-task processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronJob {
    ProcessDueTasks,
    CleanupCompletedTasks,
}

impl CronJob {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "process_scheduled_tasks" | "process_due_tasks" => Some(CronJob::ProcessDueTasks),
            "cleanup_completed_tasks" => Some(CronJob::CleanupCompletedTasks),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CronJob::ProcessDueTasks => "process_due_tasks",
            CronJob::CleanupCompletedTasks => "cleanup_completed_tasks",
        }
    }
}

pub const CRON_JOB_NAMES: &[&str] = &[
    "process_scheduled_tasks",
    "process_due_tasks",
    "cleanup_completed_tasks",
];

/// Run one job and describe what it did. Shared by the HTTP trigger, the
/// CLI and the in-process cron.
pub async fn run_cron_job(
    scheduler: &TaskScheduler,
    job: CronJob,
    retention_days: i64,
) -> Result<Value, SchedulerError> {
    match job {
        CronJob::ProcessDueTasks => {
            let summary = scheduler.process_due_tasks().await?;
            Ok(json!({
                "job": job.name(),
                "expired": summary.expired,
                "claimed": summary.claimed,
                "completed": summary.completed,
                "failed": summary.failed,
            }))
        }
        CronJob::CleanupCompletedTasks => {
            let deleted = scheduler.cleanup_completed_tasks(retention_days).await?;
            Ok(json!({
                "job": job.name(),
                "deleted": deleted,
                "retentionDays": retention_days,
            }))
        }
    }
}

/// In-process trigger for deployments without an external cron. Each tick
/// processes due tasks, then applies retention cleanup.
pub struct InternalCron {
    scheduler: Arc<TaskScheduler>,
    jobs: JobScheduler,
    expression: String,
    retention_days: i64,
    job_id: Option<Uuid>,
}

impl InternalCron {
    pub fn new(
        scheduler: Arc<TaskScheduler>,
        jobs: JobScheduler,
        expression: &str,
        retention_days: i64,
    ) -> Self {
        Self {
            scheduler,
            jobs,
            expression: expression.trim().to_string(),
            retention_days,
            job_id: None,
        }
    }
}

#[async_trait]
impl LifecycleComponent for InternalCron {
    async fn on_start(&mut self) -> Result<()> {
        let scheduler = self.scheduler.clone();
        let retention_days = self.retention_days;
        let job = Job::new_async(self.expression.as_str(), move |_uuid, mut _l| {
            let scheduler = scheduler.clone();
            Box::pin(async move {
                for job in [CronJob::ProcessDueTasks, CronJob::CleanupCompletedTasks] {
                    if let Err(e) = run_cron_job(&scheduler, job, retention_days).await {
                        error!("Internal cron job {} failed: {}", job.name(), e);
                    }
                }
            })
        })
        .map_err(|e| anyhow!("Invalid internal cron expression '{}': {}", self.expression, e))?;

        self.job_id = Some(self.jobs.add(job).await?);
        info!("Internal cron scheduled ({})", self.expression);
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        if let Some(id) = self.job_id.take() {
            self.jobs.remove(&id).await?;
        }
        Ok(())
    }
}
