use axum::{
    Extension, Json,
    extract::{Query, State},
    response::Redirect,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::core::oauth::CallbackParams;
use crate::interfaces::web::AppState;
use crate::interfaces::web::auth::AuthUser;
use crate::interfaces::web::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    #[serde(default)]
    tool: Option<String>,
}

pub async fn authorize_endpoint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Json<Value>, ApiError> {
    let tool = query
        .tool
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("tool is required"))?;
    let auth_url = state.oauth.authorization_url(&user.0, &tool).await?;
    Ok(Json(json!({ "success": true, "authUrl": auth_url })))
}

/// Provider redirect target. Always answers with a redirect back to the
/// dashboard carrying either `success=<tool>` or `error=<code>`.
pub async fn callback_endpoint(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    Redirect::to(&state.oauth.handle_callback(&params).await)
}
