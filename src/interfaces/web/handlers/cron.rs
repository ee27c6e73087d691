use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::core::scheduler::{CRON_JOB_NAMES, CronJob, run_cron_job};
use crate::interfaces::web::AppState;
use crate::interfaces::web::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronRequest {
    #[serde(default)]
    job: Option<String>,
    #[serde(default)]
    retention_days: Option<i64>,
}

pub async fn cron_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<CronRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    let name = request
        .job
        .filter(|j| !j.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("job is required"))?;
    let job = CronJob::parse(&name).ok_or_else(|| {
        ApiError::bad_request(format!(
            "Unknown job '{}'. Expected one of: {}",
            name,
            CRON_JOB_NAMES.join(", ")
        ))
    })?;

    info!("Cron trigger: {}", name);
    let retention_days = request
        .retention_days
        .unwrap_or(state.config.task_retention_days);
    let result = run_cron_job(&state.scheduler, job, retention_days).await?;
    Ok(Json(json!({ "success": true, "result": result })))
}
