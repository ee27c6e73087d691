use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};

use super::AppState;
use super::error::ApiError;
use crate::core::store::ApiTokenRepository;

/// The user a bearer token resolved to. Inserted as a request extension by
/// [`require_auth`].
#[derive(Debug, Clone)]
pub(crate) struct AuthUser(pub String);

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) async fn require_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(raw_token) = bearer_token(req.headers()) else {
        return ApiError::Unauthorized(
            "Missing or invalid Authorization header. Use: Bearer <token>".to_string(),
        )
        .into_response();
    };

    match state.tokens.resolve_api_token(&raw_token).await {
        Ok(Some(user_id)) => {
            req.extensions_mut().insert(AuthUser(user_id));
            next.run(req).await
        }
        Ok(None) => {
            ApiError::Unauthorized("Invalid or unauthorized API token".to_string()).into_response()
        }
        Err(e) => ApiError::Internal(e).into_response(),
    }
}

/// Compare digests so the comparison time does not depend on how many
/// leading bytes match.
fn secrets_match(provided: &str, expected: &str) -> bool {
    Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes())
}

/// Gate for the cron trigger and the admin log stream. With no secret
/// configured every call is rejected.
pub(crate) async fn require_cron_secret(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state
        .config
        .cron_secret_token
        .as_deref()
        .filter(|s| !s.is_empty())
    else {
        return ApiError::Unauthorized("Cron trigger is disabled: no secret configured".to_string())
            .into_response();
    };

    match bearer_token(req.headers()) {
        Some(provided) if secrets_match(&provided, expected) => next.run(req).await,
        _ => ApiError::Unauthorized("Invalid cron secret".to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PortalConfig;
    use crate::interfaces::web::test_state;
    use axum::http::StatusCode;
    use axum::{Extension, Router, middleware, routing::get};
    use tower::util::ServiceExt;

    fn protected_app(state: AppState) -> Router {
        Router::new()
            .route(
                "/api/whoami",
                get(|Extension(user): Extension<AuthUser>| async move { user.0 }),
            )
            .layer(middleware::from_fn_with_state(state.clone(), require_auth))
            .with_state(state)
    }

    fn cron_app(state: AppState) -> Router {
        Router::new()
            .route("/api/cron", get(|| async { "ran" }))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                require_cron_secret,
            ))
            .with_state(state)
    }

    async fn call(app: Router, uri: &str, bearer: Option<&str>) -> (StatusCode, String) {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = bearer {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let resp = app
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, "Bearer apk_123".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("apk_123"));
    }

    #[tokio::test]
    async fn valid_token_resolves_user() {
        let (state, store) = test_state(PortalConfig::default());
        let (raw, _) = store.create_api_token("alice", "laptop").await.unwrap();
        let (status, body) = call(protected_app(state), "/api/whoami", Some(&raw)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "alice");
    }

    #[tokio::test]
    async fn missing_or_unknown_token_is_rejected() {
        let (state, _) = test_state(PortalConfig::default());
        let (status, _) = call(protected_app(state.clone()), "/api/whoami", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, body) = call(protected_app(state), "/api/whoami", Some("apk_nope")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("\"success\":false"));
    }

    #[tokio::test]
    async fn cron_secret_unset_rejects_everything() {
        let (state, _) = test_state(PortalConfig::default());
        let (status, _) = call(cron_app(state), "/api/cron", Some("anything")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn cron_secret_must_match() {
        let config = PortalConfig {
            cron_secret_token: Some("s3cret".to_string()),
            ..Default::default()
        };
        let (state, _) = test_state(config);
        let (status, _) = call(cron_app(state.clone()), "/api/cron", Some("wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, body) = call(cron_app(state), "/api/cron", Some("s3cret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ran");
    }
}
