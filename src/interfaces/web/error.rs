use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::core::chat::ChatError;
use crate::core::error_handler::FallbackError;
use crate::core::oauth::OAuthError;
use crate::core::scheduler::SchedulerError;

/// Failure surfaced by a handler. Every variant renders as
/// `{"success": false, "error": ...}` with the matching status.
#[derive(Debug)]
pub(crate) enum ApiError {
    Unauthorized(String),
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
    Internal(anyhow::Error),
}

impl ApiError {
    pub(crate) fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                json!({ "success": false, "error": msg }),
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "success": false, "error": msg }),
            ),
            ApiError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                json!({ "success": false, "error": msg }),
            ),
            ApiError::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "success": false, "error": msg }),
            ),
            ApiError::Internal(e) => {
                error!("Request failed: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "success": false,
                        "error": "Internal server error",
                        "details": e.to_string(),
                    }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(format!("Invalid JSON body: {}", rejection.body_text()))
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::Validation(msg) => ApiError::BadRequest(msg),
            SchedulerError::NotFound(_) | SchedulerError::InvalidTransition { .. } => {
                ApiError::NotFound(e.to_string())
            }
            SchedulerError::Store(inner) => ApiError::Internal(inner),
        }
    }
}

impl From<FallbackError> for ApiError {
    fn from(e: FallbackError) -> Self {
        match e {
            FallbackError::Store(inner) => ApiError::Internal(inner),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<OAuthError> for ApiError {
    fn from(e: OAuthError) -> Self {
        match e {
            OAuthError::UnknownTool(_) | OAuthError::NotConfigured(_) => {
                ApiError::BadRequest(e.to_string())
            }
            OAuthError::Store(inner) => ApiError::Internal(inner),
            other => ApiError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::Disabled => ApiError::Unavailable(e.to_string()),
            ChatError::AgentNotFound(_) => ApiError::NotFound(e.to_string()),
            ChatError::EmptyMessage => ApiError::BadRequest(e.to_string()),
            ChatError::Store(inner) => ApiError::Internal(inner),
        }
    }
}

/// Numeric query parameter policy: absent means `default`; anything that is
/// not an integer in `1..=max` is rejected.
pub(crate) fn positive_param(
    name: &str,
    raw: Option<&str>,
    default: i64,
    max: i64,
) -> Result<i64, ApiError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().parse::<i64>() {
        Ok(n) if n > 0 && n <= max => Ok(n),
        Ok(n) if n > max => Err(ApiError::BadRequest(format!(
            "{} must be at most {}",
            name, max
        ))),
        _ => Err(ApiError::BadRequest(format!(
            "{} must be a positive integer",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_param_policy() {
        assert_eq!(positive_param("days", None, 30, 365).unwrap(), 30);
        assert_eq!(positive_param("days", Some("7"), 30, 365).unwrap(), 7);
        assert_eq!(positive_param("days", Some("365"), 30, 365).unwrap(), 365);
        for bad in [
            "invalid",
            "0",
            "-3",
            "",
            "1.5",
            "366",
            "1000000000",
            "9223372036854775807",
            "9223372036854775808",
        ] {
            assert!(
                matches!(positive_param("days", Some(bad), 30, 365), Err(ApiError::BadRequest(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn scheduler_errors_map_to_statuses() {
        let resp = ApiError::from(SchedulerError::Validation("agentId is required".into()))
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = ApiError::from(SchedulerError::InvalidTransition {
            id: "t1".into(),
            action: "cancelled",
            status: "completed",
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = ApiError::from(anyhow::anyhow!("disk full")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
