use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::AppState;
use super::auth;
use super::handlers::{
    agents, cron, dead_letters, errors, health, integrations, logs, oauth, tasks,
};
use crate::core::config::PortalConfig;

fn build_cors(config: &PortalConfig) -> CorsLayer {
    let mut origins: Vec<HeaderValue> = [config.public_url(), config.dashboard_url()]
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    origins.dedup();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

pub fn build_api_router(state: AppState) -> Router {
    // Provider redirects and probes carry no bearer token
    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route(
            "/api/integrations/oauth/callback",
            get(oauth::callback_endpoint),
        )
        .with_state(state.clone());

    let cron_routes = Router::new()
        .route("/api/plugin-engine/cron", post(cron::cron_endpoint))
        .route("/api/admin/logs", get(logs::sse_logs_endpoint))
        .route(
            "/api/admin/dead-letters",
            get(dead_letters::list_dead_letters_endpoint),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_cron_secret,
        ))
        .with_state(state.clone());

    let authed_routes = Router::new()
        .route(
            "/api/integrations",
            get(integrations::integration_status_endpoint)
                .post(integrations::execute_integration_endpoint)
                .delete(integrations::disconnect_integration_endpoint),
        )
        .route(
            "/api/integrations/oauth/authorize",
            get(oauth::authorize_endpoint),
        )
        .route(
            "/api/plugin-engine/tasks",
            get(tasks::list_tasks_endpoint).delete(tasks::cancel_task_endpoint),
        )
        .route(
            "/api/plugin-engine/tasks/schedule",
            post(tasks::schedule_task_endpoint),
        )
        .route(
            "/api/plugin-engine/tasks/retry",
            post(tasks::retry_task_endpoint),
        )
        .route(
            "/api/plugin-engine/errors",
            get(errors::list_errors_endpoint),
        )
        .route(
            "/api/plugin-engine/errors/trends",
            get(errors::error_trends_endpoint),
        )
        .route(
            "/api/plugin-engine/errors/fallbacks",
            get(errors::get_fallback_endpoint).post(errors::set_fallback_endpoint),
        )
        .route(
            "/api/plugin-engine/errors/bulk",
            post(errors::bulk_resolve_endpoint),
        )
        .route(
            "/api/agents",
            get(agents::list_agents_endpoint).post(agents::create_agent_endpoint),
        )
        .route(
            "/api/agents/{agent}",
            axum::routing::delete(agents::delete_agent_endpoint),
        )
        .route(
            "/api/agents/{agent}/messages",
            get(agents::list_messages_endpoint),
        )
        .route(
            "/api/agents/{agent}/chat",
            post(agents::chat_stream_endpoint),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .with_state(state.clone());

    public_routes
        .merge(cron_routes)
        .merge(authed_routes)
        .layer(middleware::from_fn(security_headers))
        .layer(build_cors(&state.config))
        .layer(TraceLayer::new_for_http())
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}
