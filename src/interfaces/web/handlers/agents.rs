use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use crate::core::store::types::AgentRecord;
use crate::core::store::{AgentRepository, ChatRepository};
use crate::interfaces::web::AppState;
use crate::interfaces::web::auth::AuthUser;
use crate::interfaces::web::error::{ApiError, positive_param};

const DEFAULT_MESSAGE_LIMIT: i64 = 50;
const MAX_MESSAGE_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    persona: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(default)]
    limit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    message: String,
}

/// The caller's agent, or 404 for missing and foreign ids alike.
pub(crate) async fn owned_agent(
    state: &AppState,
    user: &AuthUser,
    id: &str,
) -> Result<AgentRecord, ApiError> {
    state
        .agents
        .get_agent(id)
        .await?
        .filter(|a| a.user_id == user.0)
        .ok_or_else(|| ApiError::NotFound(format!("Agent '{}' not found", id)))
}

pub async fn list_agents_endpoint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, ApiError> {
    let agents = state.agents.list_agents(&user.0).await?;
    Ok(Json(json!({ "success": true, "agents": agents })))
}

pub async fn create_agent_endpoint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<CreateAgentRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let name = body.name.unwrap_or_default();
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    let persona = body.persona.unwrap_or_default();
    let agent = state
        .agents
        .create_agent(&user.0, name, persona.trim())
        .await?;
    Ok(Json(json!({ "success": true, "agent": agent })))
}

pub async fn delete_agent_endpoint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(agent_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.agents.delete_agent(&user.0, &agent_id).await? {
        return Err(ApiError::NotFound(format!("Agent '{}' not found", agent_id)));
    }
    Ok(Json(json!({ "success": true, "message": "Agent deleted" })))
}

pub async fn list_messages_endpoint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(agent_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = positive_param(
        "limit",
        query.limit.as_deref(),
        DEFAULT_MESSAGE_LIMIT,
        MAX_MESSAGE_LIMIT,
    )?;
    owned_agent(&state, &user, &agent_id).await?;
    let messages = state
        .chat_history
        .list_chat_messages(&agent_id, limit as usize)
        .await?;
    Ok(Json(json!({ "success": true, "messages": messages })))
}

/// Streams the reply as SSE `data:` frames of JSON chat events. The turn
/// is saved after the stream ends, independently of the client.
pub async fn chat_stream_endpoint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(agent_id): Path<String>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload?;
    let session = state
        .chat
        .start_chat(&agent_id, &user.0, &body.message)
        .await?;

    let stream = ReceiverStream::new(session.events).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok::<_, Infallible>(Event::default().data(data))
    });
    Ok(Sse::new(stream).into_response())
}
