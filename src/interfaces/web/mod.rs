pub(crate) mod auth;
mod error;
mod handlers;
mod router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tracing::{error, info};

use crate::core::chat::ChatService;
use crate::core::config::PortalConfig;
use crate::core::error_handler::ErrorHandler;
use crate::core::integrations::{IntegrationRegistry, KNOWN_TOOLS};
use crate::core::lifecycle::LifecycleComponent;
use crate::core::llm::LlmProvider;
use crate::core::llm::openai::OpenAiCompatibleProvider;
use crate::core::oauth::OAuthService;
use crate::core::scheduler::TaskScheduler;
use crate::core::store::{
    AgentRepository, ApiTokenRepository, ChatRepository, DeadLetterRepository, SqliteStore,
};

pub use router::build_api_router;

/// Everything a handler can reach. Built once at start-up; cloning only
/// bumps reference counts.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<PortalConfig>,
    pub(crate) tokens: Arc<dyn ApiTokenRepository>,
    pub(crate) agents: Arc<dyn AgentRepository>,
    pub(crate) chat_history: Arc<dyn ChatRepository>,
    pub(crate) dead_letters: Arc<dyn DeadLetterRepository>,
    pub(crate) oauth: Arc<OAuthService>,
    pub(crate) integrations: Arc<IntegrationRegistry>,
    pub(crate) scheduler: Arc<TaskScheduler>,
    pub(crate) errors: Arc<ErrorHandler>,
    pub(crate) chat: Arc<ChatService>,
    pub(crate) log_tx: broadcast::Sender<String>,
}

impl AppState {
    /// Wire every component against one store.
    pub(crate) fn build(
        config: Arc<PortalConfig>,
        store: Arc<SqliteStore>,
        log_tx: broadcast::Sender<String>,
    ) -> Self {
        let errors = Arc::new(ErrorHandler::new(store.clone(), store.clone()));
        let oauth = Arc::new(OAuthService::new(
            config.clone(),
            store.clone(),
            store.clone(),
        ));
        let integrations = Arc::new(IntegrationRegistry::with_default_adapters(
            &config,
            store.clone(),
            oauth.clone(),
            errors.clone(),
        ));
        let scheduler = Arc::new(TaskScheduler::new(
            store.clone(),
            integrations.clone(),
            KNOWN_TOOLS.iter().map(|t| t.to_string()).collect(),
        ));

        let llm: Option<Arc<dyn LlmProvider>> = config
            .llm
            .api_key
            .as_ref()
            .map(|key| -> Arc<dyn LlmProvider> {
                Arc::new(OpenAiCompatibleProvider::new(
                    &config.llm.base_url,
                    key.clone(),
                    config.llm.model.clone(),
                ))
            });
        if llm.is_none() {
            info!("No LLM API key configured; agent chat is disabled");
        }
        let chat = Arc::new(ChatService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            errors.clone(),
            llm,
        ));

        Self {
            config,
            tokens: store.clone(),
            agents: store.clone(),
            chat_history: store.clone(),
            dead_letters: store,
            oauth,
            integrations,
            scheduler,
            errors,
            chat,
            log_tx,
        }
    }
}

/// The HTTP API as a lifecycle component.
pub struct ApiServer {
    state: AppState,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ApiServer {
    pub(crate) fn new(state: AppState) -> Self {
        Self {
            state,
            shutdown_tx: None,
        }
    }
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API server initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.state.config.api_host, self.state.config.api_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        let app = build_api_router(self.state.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);

        info!("API server running at http://{}", addr);
        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                error!("API server crashed: {}", e);
            }
        });
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API server shutting down...");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_state(config: PortalConfig) -> (AppState, Arc<SqliteStore>) {
    let store = crate::core::store::test_store();
    let (log_tx, _) = broadcast::channel(16);
    (
        AppState::build(Arc::new(config), store.clone(), log_tx),
        store,
    )
}
