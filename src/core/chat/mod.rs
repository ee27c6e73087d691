use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use crate::core::error_handler::ErrorHandler;
use crate::core::llm::{ChatMessage, LlmProvider};
use crate::core::store::{AgentRepository, ChatRepository, DeadLetterRepository};

pub const DEFAULT_HISTORY_LIMIT: usize = 20;
const LLM_TOOL: &str = "llm";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatEvent {
    Token { text: String },
    Fallback { text: String },
    Done,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Chat is not configured on this server")]
    Disabled,
    #[error("Agent '{0}' not found")]
    AgentNotFound(String),
    #[error("message is required")]
    EmptyMessage,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// A running chat turn. `events` yields the SSE payloads; `persisted`
/// finishes once the turn has been written (or dead-lettered).
pub struct ChatSession {
    pub events: mpsc::Receiver<ChatEvent>,
    pub persisted: JoinHandle<()>,
}

pub struct ChatService {
    agents: Arc<dyn AgentRepository>,
    history: Arc<dyn ChatRepository>,
    dead_letters: Arc<dyn DeadLetterRepository>,
    errors: Arc<ErrorHandler>,
    llm: Option<Arc<dyn LlmProvider>>,
    history_limit: usize,
}

impl ChatService {
    pub fn new(
        agents: Arc<dyn AgentRepository>,
        history: Arc<dyn ChatRepository>,
        dead_letters: Arc<dyn DeadLetterRepository>,
        errors: Arc<ErrorHandler>,
        llm: Option<Arc<dyn LlmProvider>>,
    ) -> Self {
        Self {
            agents,
            history,
            dead_letters,
            errors,
            llm,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub async fn start_chat(
        &self,
        agent_id: &str,
        user_id: &str,
        message: &str,
    ) -> Result<ChatSession, ChatError> {
        let llm = self.llm.clone().ok_or(ChatError::Disabled)?;
        let message = message.trim();
        if message.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let agent = self
            .agents
            .get_agent(agent_id)
            .await?
            .filter(|a| a.user_id == user_id)
            .ok_or_else(|| ChatError::AgentNotFound(agent_id.to_string()))?;

        let mut prompt = Vec::new();
        if !agent.persona.trim().is_empty() {
            prompt.push(ChatMessage::new("system", agent.persona.clone()));
        }
        for past in self
            .history
            .list_chat_messages(agent_id, self.history_limit)
            .await?
        {
            prompt.push(ChatMessage::new(&past.role, past.content));
        }
        prompt.push(ChatMessage::new("user", message));

        let (tx, rx) = mpsc::channel::<ChatEvent>(32);
        let turn = Turn {
            agent_id: agent_id.to_string(),
            user_id: user_id.to_string(),
            message: message.to_string(),
            history: self.history.clone(),
            dead_letters: self.dead_letters.clone(),
            errors: self.errors.clone(),
        };
        let persisted = tokio::spawn(async move {
            let reply = turn.stream_reply(llm.as_ref(), &prompt, &tx).await;
            let _ = tx.send(ChatEvent::Done).await;
            drop(tx);
            turn.persist(&reply).await;
        });

        Ok(ChatSession {
            events: rx,
            persisted,
        })
    }
}

struct Turn {
    agent_id: String,
    user_id: String,
    message: String,
    history: Arc<dyn ChatRepository>,
    dead_letters: Arc<dyn DeadLetterRepository>,
    errors: Arc<ErrorHandler>,
}

impl Turn {
    /// Forward tokens as they arrive. On upstream failure the error is
    /// recorded and the fallback text is sent instead. Returns what the user
    /// saw as the assistant reply.
    async fn stream_reply(
        &self,
        llm: &dyn LlmProvider,
        prompt: &[ChatMessage],
        tx: &mpsc::Sender<ChatEvent>,
    ) -> String {
        let mut reply = String::new();
        let failure = match llm.stream_chat(prompt).await {
            Ok(mut stream) => {
                let mut failure = None;
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(text) => {
                            reply.push_str(&text);
                            // keep generating even if the client went away so
                            // the turn is still saved
                            let _ = tx.send(ChatEvent::Token { text }).await;
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                failure
            }
            Err(e) => Some(e),
        };

        if let Some(e) = failure {
            if let Err(record_err) = self
                .errors
                .record_error(LLM_TOOL, Some(&self.agent_id), "LLM_ERROR", &e.to_string())
                .await
            {
                warn!("Failed to record LLM error: {}", record_err);
            }
            let fallback = self
                .errors
                .get_fallback_message(LLM_TOOL, Some(&self.agent_id))
                .await
                .unwrap_or_else(|_| {
                    crate::core::error_handler::default_fallback_message(LLM_TOOL).to_string()
                });
            let _ = tx
                .send(ChatEvent::Fallback {
                    text: fallback.clone(),
                })
                .await;
            if reply.is_empty() {
                reply = fallback;
            }
        }
        reply
    }

    async fn persist(&self, reply: &str) {
        let result = self
            .history
            .append_chat_messages(
                &self.agent_id,
                &self.user_id,
                &[("user", self.message.as_str()), ("assistant", reply)],
            )
            .await;
        let Err(e) = result else {
            info!("Saved chat turn for agent {}", self.agent_id);
            return;
        };

        error!(
            "Failed to persist chat turn for agent {}: {}",
            self.agent_id, e
        );
        let payload = serde_json::json!({
            "agentId": self.agent_id,
            "userId": self.user_id,
            "message": self.message,
            "reply": reply,
        })
        .to_string();
        if let Err(dl_err) = self
            .dead_letters
            .insert_dead_letter("chat_turn", &payload, &e.to_string())
            .await
        {
            error!("Failed to write chat dead letter: {}", dl_err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::llm::TokenStream;
    use crate::core::store::types::ChatMessageRecord;
    use crate::core::store::{ErrorRepository, FallbackRepository, SqliteStore, test_store};
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    struct ScriptedLlm {
        tokens: Vec<&'static str>,
        fail_midway: bool,
        refuse: bool,
        seen: Mutex<Vec<ChatMessage>>,
    }

    impl ScriptedLlm {
        fn new(tokens: Vec<&'static str>) -> Self {
            Self {
                tokens,
                fail_midway: false,
                refuse: false,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
            *self.seen.lock().await = messages.to_vec();
            if self.refuse {
                return Err(anyhow!("connection refused"));
            }
            let mut items: Vec<Result<String>> =
                self.tokens.iter().map(|t| Ok(t.to_string())).collect();
            if self.fail_midway {
                items.push(Err(anyhow!("stream reset")));
            }
            Ok(Box::pin(tokio_stream::iter(items)))
        }
    }

    struct BrokenHistory;

    #[async_trait]
    impl ChatRepository for BrokenHistory {
        async fn append_chat_messages(
            &self,
            _agent_id: &str,
            _user_id: &str,
            _messages: &[(&str, &str)],
        ) -> Result<()> {
            Err(anyhow!("database is locked"))
        }

        async fn list_chat_messages(
            &self,
            _agent_id: &str,
            _limit: usize,
        ) -> Result<Vec<ChatMessageRecord>> {
            Ok(Vec::new())
        }
    }

    fn service(
        store: &Arc<SqliteStore>,
        history: Arc<dyn ChatRepository>,
        llm: Option<Arc<dyn LlmProvider>>,
    ) -> ChatService {
        let errors = Arc::new(ErrorHandler::new(store.clone(), store.clone()));
        ChatService::new(store.clone(), history, store.clone(), errors, llm)
    }

    async fn drain(session: ChatSession) -> Vec<ChatEvent> {
        let ChatSession {
            mut events,
            persisted,
        } = session;
        let mut out = Vec::new();
        while let Some(ev) = events.recv().await {
            out.push(ev);
        }
        persisted.await.unwrap();
        out
    }

    #[tokio::test]
    async fn streams_tokens_then_persists_turn() {
        let store = test_store();
        let agent = store.create_agent("alice", "Helper", "Be brief.").await.unwrap();
        let llm = Arc::new(ScriptedLlm::new(vec!["Hel", "lo"]));
        let svc = service(&store, store.clone(), Some(llm.clone()));

        let events = drain(svc.start_chat(&agent.id, "alice", "hi").await.unwrap()).await;
        assert_eq!(
            events,
            vec![
                ChatEvent::Token { text: "Hel".into() },
                ChatEvent::Token { text: "lo".into() },
                ChatEvent::Done,
            ]
        );

        let seen = llm.seen.lock().await.clone();
        assert_eq!(seen[0], ChatMessage::new("system", "Be brief."));
        assert_eq!(seen.last().unwrap(), &ChatMessage::new("user", "hi"));

        let history = store.list_chat_messages(&agent.id, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, "assistant");
        assert_eq!(history[1].content, "Hello");
    }

    #[tokio::test]
    async fn upstream_failure_sends_fallback_and_records_error() {
        let store = test_store();
        let agent = store.create_agent("alice", "Helper", "").await.unwrap();
        let mut llm = ScriptedLlm::new(vec![]);
        llm.refuse = true;
        let svc = service(&store, store.clone(), Some(Arc::new(llm)));

        let events = drain(svc.start_chat(&agent.id, "alice", "hi").await.unwrap()).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ChatEvent::Fallback { text } if !text.is_empty()));
        assert_eq!(events[1], ChatEvent::Done);

        let errors = store.list_errors(10, Some("llm"), false).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_code, "LLM_ERROR");
    }

    #[tokio::test]
    async fn midstream_failure_keeps_partial_tokens() {
        let store = test_store();
        let agent = store.create_agent("alice", "Helper", "").await.unwrap();
        store
            .upsert_fallback("llm", None, "Try again soon.", None)
            .await
            .unwrap();
        let mut llm = ScriptedLlm::new(vec!["Par"]);
        llm.fail_midway = true;
        let svc = service(&store, store.clone(), Some(Arc::new(llm)));

        let events = drain(svc.start_chat(&agent.id, "alice", "hi").await.unwrap()).await;
        assert_eq!(
            events,
            vec![
                ChatEvent::Token { text: "Par".into() },
                ChatEvent::Fallback { text: "Try again soon.".into() },
                ChatEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn persistence_failure_writes_dead_letter() {
        let store = test_store();
        let agent = store.create_agent("alice", "Helper", "").await.unwrap();
        let llm = Arc::new(ScriptedLlm::new(vec!["ok"]));
        let svc = service(&store, Arc::new(BrokenHistory), Some(llm));

        let events = drain(svc.start_chat(&agent.id, "alice", "hi").await.unwrap()).await;
        assert_eq!(events.last(), Some(&ChatEvent::Done));

        let letters = store.list_dead_letters(10).await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].kind, "chat_turn");
        assert!(letters[0].error.contains("database is locked"));
        let payload: serde_json::Value = serde_json::from_str(&letters[0].payload).unwrap();
        assert_eq!(payload["reply"], "ok");
    }

    #[tokio::test]
    async fn rejects_disabled_foreign_and_empty() {
        let store = test_store();
        let agent = store.create_agent("alice", "Helper", "").await.unwrap();

        let disabled = service(&store, store.clone(), None);
        assert!(matches!(
            disabled.start_chat(&agent.id, "alice", "hi").await,
            Err(ChatError::Disabled)
        ));

        let svc = service(&store, store.clone(), Some(Arc::new(ScriptedLlm::new(vec![]))));
        assert!(matches!(
            svc.start_chat(&agent.id, "bob", "hi").await,
            Err(ChatError::AgentNotFound(_))
        ));
        assert!(matches!(
            svc.start_chat(&agent.id, "alice", "   ").await,
            Err(ChatError::EmptyMessage)
        ));
    }

    #[test]
    fn events_serialize_with_type_tag() {
        assert_eq!(
            serde_json::to_value(ChatEvent::Token { text: "a".into() }).unwrap(),
            serde_json::json!({ "type": "token", "text": "a" })
        );
        assert_eq!(
            serde_json::to_value(ChatEvent::Done).unwrap(),
            serde_json::json!({ "type": "done" })
        );
    }
}
