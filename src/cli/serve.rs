use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::open_portal;
use crate::core::lifecycle::LifecycleManager;
use crate::core::scheduler::InternalCron;
use crate::core::terminal::{print_link, print_status};
use crate::interfaces::web::{ApiServer, AppState};
use crate::logging::init_logging;

pub async fn run_server(api_host: Option<String>, api_port: Option<u16>) -> Result<()> {
    let log_tx = init_logging(false);
    let (mut config, store) = open_portal().await?;
    if let Some(host) = api_host {
        config.api_host = host;
    }
    if let Some(port) = api_port {
        config.api_port = port;
    }
    if config.cron_secret_token.is_none() {
        warn!("CRON_SECRET_TOKEN is not set; the cron trigger endpoint will reject every call");
    }

    let config = Arc::new(config);
    let state = AppState::build(config.clone(), store, log_tx);

    let mut lifecycle = LifecycleManager::new().await?;
    lifecycle.attach(Arc::new(Mutex::new(ApiServer::new(state.clone()))));
    if let Some(expr) = config.internal_cron.as_deref().filter(|e| !e.trim().is_empty()) {
        lifecycle.attach(Arc::new(Mutex::new(InternalCron::new(
            state.scheduler.clone(),
            lifecycle.scheduler.clone(),
            expr,
            config.task_retention_days,
        ))));
    }
    lifecycle.start().await?;

    print_link(
        "API",
        &format!("http://{}:{}/api", config.api_host, config.api_port),
    );
    print_status("OAuth redirect URI", &config.oauth_redirect_uri());
    print_status("Press Ctrl+C to stop", "");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    lifecycle.shutdown().await?;
    Ok(())
}
