use axum::{
    Extension, Json,
    extract::{Query, State, rejection::JsonRejection},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::core::scheduler::ScheduleTaskRequest;
use crate::core::store::types::TaskStatus;
use crate::interfaces::web::AppState;
use crate::interfaces::web::auth::AuthUser;
use crate::interfaces::web::error::ApiError;
use crate::interfaces::web::handlers::agents::owned_agent;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskListQuery {
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIdBody {
    #[serde(default)]
    task_id: Option<String>,
}

impl TaskIdBody {
    fn task_id(self) -> Result<String, ApiError> {
        self.task_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ApiError::bad_request("taskId is required"))
    }
}

pub async fn schedule_task_endpoint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<ScheduleTaskRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    if let Some(agent_id) = request.agent_id.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
        owned_agent(&state, &user, agent_id).await?;
    }
    let task = state.scheduler.schedule_task(&request, &user.0).await?;
    Ok(Json(json!({ "success": true, "taskId": task.id, "task": task })))
}

pub async fn list_tasks_endpoint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<Value>, ApiError> {
    let agent_id = query
        .agent_id
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("agentId is required"))?;
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        None => None,
        Some(raw) => Some(
            TaskStatus::from_status(raw)
                .ok_or_else(|| ApiError::bad_request(format!("Unknown status '{}'", raw)))?,
        ),
    };

    let tasks = state
        .scheduler
        .get_agent_tasks(&agent_id, Some(&user.0), status)
        .await?;
    Ok(Json(json!({ "success": true, "tasks": tasks })))
}

pub async fn cancel_task_endpoint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<TaskIdBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let task_id = body.task_id()?;
    state.scheduler.cancel_task(&task_id, Some(&user.0)).await?;
    Ok(Json(json!({
        "success": true,
        "taskId": task_id,
        "status": TaskStatus::Cancelled.as_str(),
    })))
}

pub async fn retry_task_endpoint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<TaskIdBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let task_id = body.task_id()?;
    state.scheduler.retry_task(&task_id, Some(&user.0)).await?;
    Ok(Json(json!({
        "success": true,
        "taskId": task_id,
        "status": TaskStatus::Scheduled.as_str(),
    })))
}
