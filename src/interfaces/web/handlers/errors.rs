use axum::{
    Extension, Json,
    extract::{Query, State, rejection::JsonRejection},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::core::error_handler::{
    DEFAULT_TOP_CODES, DEFAULT_WINDOW_DAYS, MAX_TOP_CODES, MAX_WINDOW_DAYS,
};
use crate::interfaces::web::AppState;
use crate::interfaces::web::auth::AuthUser;
use crate::interfaces::web::error::{ApiError, positive_param};

/// Query parameters are kept as raw strings so numeric validation can
/// produce a field-specific 400.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorQuery {
    #[serde(default)]
    limit: Option<String>,
    #[serde(default)]
    days: Option<String>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    include_resolved: Option<String>,
    #[serde(default)]
    agent_id: Option<String>,
}

impl ErrorQuery {
    fn tool(&self) -> Option<&str> {
        self.tool.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    fn limit(&self) -> Result<usize, ApiError> {
        positive_param(
            "limit",
            self.limit.as_deref(),
            DEFAULT_TOP_CODES as i64,
            MAX_TOP_CODES as i64,
        )
        .map(|n| n as usize)
    }

    fn days(&self) -> Result<i64, ApiError> {
        positive_param("days", self.days.as_deref(), DEFAULT_WINDOW_DAYS, MAX_WINDOW_DAYS)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackBody {
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    agent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResolveBody {
    #[serde(default)]
    error_ids: Option<Vec<String>>,
}

pub async fn list_errors_endpoint(
    State(state): State<AppState>,
    Query(query): Query<ErrorQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit()?;
    let include_resolved = matches!(query.include_resolved.as_deref(), Some("true" | "1"));
    let errors = state
        .errors
        .list_errors(limit, query.tool(), include_resolved)
        .await?;
    Ok(Json(json!({ "success": true, "errors": errors })))
}

pub async fn error_trends_endpoint(
    State(state): State<AppState>,
    Query(query): Query<ErrorQuery>,
) -> Result<Json<Value>, ApiError> {
    let days = query.days()?;
    let limit = query.limit()?;

    let trends = state.errors.get_error_trends(days, query.tool()).await?;
    let by_tool = state.errors.get_error_stats_by_tool(days).await?;
    let top_codes = state
        .errors
        .get_most_frequent_error_codes(limit, days)
        .await?;
    Ok(Json(json!({
        "success": true,
        "days": days,
        "trends": trends,
        "byTool": by_tool,
        "topErrorCodes": top_codes,
    })))
}

pub async fn get_fallback_endpoint(
    State(state): State<AppState>,
    Query(query): Query<ErrorQuery>,
) -> Result<Json<Value>, ApiError> {
    let tool = query
        .tool()
        .ok_or_else(|| ApiError::bad_request("tool is required"))?;
    let agent_id = query.agent_id.as_deref().filter(|a| !a.is_empty());
    let message = state.errors.get_fallback_message(tool, agent_id).await?;
    Ok(Json(json!({
        "success": true,
        "tool": tool,
        "agentId": agent_id,
        "message": message,
    })))
}

pub async fn set_fallback_endpoint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<FallbackBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let tool = body.tool.unwrap_or_default();
    let message = body.message.unwrap_or_default();
    state
        .errors
        .set_fallback_message(
            tool.trim(),
            &message,
            body.agent_id.as_deref(),
            Some(&user.0),
        )
        .await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn bulk_resolve_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<BulkResolveBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let ids = body
        .error_ids
        .ok_or_else(|| ApiError::bad_request("errorIds must be an array of ids"))?;
    let resolved = state.errors.bulk_resolve_errors(&ids).await?;
    Ok(Json(json!({ "success": true, "resolved": resolved })))
}
