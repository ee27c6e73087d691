use anyhow::{Result, anyhow};
use std::sync::Arc;

use super::{flag_value, open_portal};
use crate::core::scheduler::{CRON_JOB_NAMES, CronJob, run_cron_job};
use crate::core::terminal::{print_status, print_success};
use crate::interfaces::web::AppState;
use crate::logging::init_logging;

/// Run a cron job once in-process, for hosts where the system crontab
/// drives the portal instead of the HTTP trigger.
pub async fn run_cron_command(args: &[String]) -> Result<()> {
    let name = args.get(2).cloned().unwrap_or_default();
    let job = CronJob::parse(&name).ok_or_else(|| {
        anyhow!(
            "Unknown job '{}'. Expected one of: {}",
            name,
            CRON_JOB_NAMES.join(", ")
        )
    })?;

    let log_tx = init_logging(false);
    let (config, store) = open_portal().await?;
    let retention_days = match flag_value(args, 3, &["--retention-days"]) {
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|_| anyhow!("Invalid --retention-days '{}'", raw))?,
        None => config.task_retention_days,
    };

    let state = AppState::build(Arc::new(config), store, log_tx);
    let result = run_cron_job(&state.scheduler, job, retention_days).await?;

    print_success(&format!("Job {} finished.", job.name()));
    if let Some(fields) = result.as_object() {
        for (key, value) in fields.iter().filter(|(k, _)| *k != "job") {
            print_status(key, &value.to_string());
        }
    }
    Ok(())
}
