use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::core::store::DeadLetterRepository;
use crate::interfaces::web::AppState;
use crate::interfaces::web::error::{ApiError, positive_param};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    #[serde(default)]
    limit: Option<String>,
}

/// Writes that were dropped after a response had already been sent,
/// newest first.
pub async fn list_dead_letters_endpoint(
    State(state): State<AppState>,
    Query(query): Query<DeadLetterQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = positive_param("limit", query.limit.as_deref(), DEFAULT_LIMIT, MAX_LIMIT)?;
    let letters = state.dead_letters.list_dead_letters(limit as usize).await?;
    Ok(Json(json!({ "success": true, "deadLetters": letters })))
}
