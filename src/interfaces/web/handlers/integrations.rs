use axum::{
    Extension, Json,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::core::integrations::{IntegrationAction, IntegrationExecutor, IntegrationRequest};
use crate::interfaces::web::AppState;
use crate::interfaces::web::auth::AuthUser;
use crate::interfaces::web::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationCall {
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    agent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ToolQuery {
    #[serde(default)]
    tool: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ToolBody {
    #[serde(default)]
    tool: Option<String>,
}

fn required_field(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("{} is required", field)))
}

async fn execute(state: &AppState, request: IntegrationRequest) -> Response {
    let outcome = state.integrations.execute_integration(request).await;
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(outcome)).into_response()
}

pub async fn execute_integration_endpoint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<IntegrationCall>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(call) = payload?;
    let tool = required_field(call.tool, "tool")?;
    let raw_action = required_field(call.action, "action")?;
    let action = IntegrationAction::parse(&raw_action)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown action '{}'", raw_action)))?;

    Ok(execute(
        &state,
        IntegrationRequest {
            tool,
            action,
            params: call.params.unwrap_or_else(|| json!({})),
            user_id: user.0,
            agent_id: call.agent_id.filter(|a| !a.is_empty()),
        },
    )
    .await)
}

pub async fn integration_status_endpoint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ToolQuery>,
) -> Result<Json<Value>, ApiError> {
    let tools = state.integrations.list_adapters();
    match query.tool.filter(|t| !t.is_empty()) {
        Some(tool) => {
            if !tools.contains(&tool) {
                return Err(ApiError::bad_request(format!(
                    "Integration '{}' not found",
                    tool
                )));
            }
            let status = state.integrations.connection_status(&user.0, &tool).await?;
            Ok(Json(json!({ "success": true, "integration": status })))
        }
        None => {
            let mut statuses = Vec::with_capacity(tools.len());
            for tool in &tools {
                statuses.push(state.integrations.connection_status(&user.0, tool).await?);
            }
            Ok(Json(json!({ "success": true, "integrations": statuses })))
        }
    }
}

pub async fn disconnect_integration_endpoint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<ToolBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload?;
    let tool = required_field(body.tool, "tool")?;
    Ok(execute(
        &state,
        IntegrationRequest {
            tool,
            action: IntegrationAction::Disconnect,
            params: json!({}),
            user_id: user.0,
            agent_id: None,
        },
    )
    .await)
}
