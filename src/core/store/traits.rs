//! Repository interfaces. Every component depends on these traits; the
//! SQLite store is the single implementation.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::types::{
    AgentRecord, ApiTokenRecord, ChatMessageRecord, CredentialRecord, CredentialStatus,
    DeadLetterRecord, ErrorRecord, FallbackRecord, NewCredential, NewTask, OAuthStateRecord,
    TaskRecord, TaskStatus,
};

#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Insert or replace the credential for (user, tool) and mark it active.
    async fn upsert_credential(&self, credential: &NewCredential) -> Result<()>;

    async fn get_credential(&self, user_id: &str, tool: &str) -> Result<Option<CredentialRecord>>;

    /// Replace the token pair after a refresh. A `None` refresh token keeps
    /// the stored one.
    async fn update_credential_tokens(
        &self,
        user_id: &str,
        tool: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    async fn set_credential_status(
        &self,
        user_id: &str,
        tool: &str,
        status: CredentialStatus,
    ) -> Result<bool>;

    /// Mark revoked and wipe the stored tokens.
    async fn revoke_credential(&self, user_id: &str, tool: &str) -> Result<bool>;
}

#[async_trait]
pub trait OAuthStateRepository: Send + Sync {
    async fn insert_oauth_state(&self, state: &OAuthStateRecord) -> Result<()>;

    /// Delete the state if it matches (csrf, user, tool) and has not expired.
    /// Returns whether a row was consumed.
    async fn take_oauth_state(
        &self,
        csrf_token: &str,
        user_id: &str,
        tool: &str,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    async fn purge_expired_oauth_states(&self, now: DateTime<Utc>) -> Result<usize>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn insert_task(&self, task: &NewTask) -> Result<TaskRecord>;

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>>;

    /// Tasks for an agent ordered by scheduled time, optionally scoped to an
    /// owner and a status.
    async fn list_agent_tasks(
        &self,
        agent_id: &str,
        user_id: Option<&str>,
        status: Option<TaskStatus>,
    ) -> Result<Vec<TaskRecord>>;

    /// Conditional status change `from -> to`. Moving back to `scheduled`
    /// clears result, error and worker token. Returns false when the task is
    /// missing or not in `from`.
    async fn transition_task(&self, id: &str, from: TaskStatus, to: TaskStatus) -> Result<bool>;

    /// Atomically move every due `scheduled` task to `running`, stamped with
    /// `worker_token`, and return the claimed rows.
    async fn claim_due_tasks(
        &self,
        now: DateTime<Utc>,
        worker_token: &str,
    ) -> Result<Vec<TaskRecord>>;

    /// Write the outcome of a claimed task. Only the claiming worker can
    /// finish it.
    async fn finish_task(
        &self,
        id: &str,
        worker_token: &str,
        status: TaskStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<bool>;

    /// Fail every `running` task claimed at or before `claimed_before`,
    /// releasing its worker token. A claim stamps `updated_at`, so that is
    /// the claim time while the task runs.
    async fn expire_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
        error: &str,
    ) -> Result<usize>;

    async fn delete_completed_tasks_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

#[async_trait]
pub trait ErrorRepository: Send + Sync {
    async fn insert_error(
        &self,
        tool: &str,
        agent_id: Option<&str>,
        error_code: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<ErrorRecord>;

    async fn list_errors(
        &self,
        limit: usize,
        tool: Option<&str>,
        include_resolved: bool,
    ) -> Result<Vec<ErrorRecord>>;

    /// `(YYYY-MM-DD, count)` pairs for errors created at or after `since`.
    async fn count_errors_by_day(
        &self,
        since: DateTime<Utc>,
        tool: Option<&str>,
    ) -> Result<Vec<(String, i64)>>;

    async fn count_errors_by_tool(&self, since: DateTime<Utc>) -> Result<Vec<(String, i64)>>;

    /// Most frequent codes first; ties broken by code.
    async fn count_errors_by_code(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(String, i64)>>;

    /// Mark the given ids resolved, skipping unknown ids. Returns how many
    /// rows matched.
    async fn resolve_errors(&self, ids: &[String]) -> Result<usize>;
}

#[async_trait]
pub trait FallbackRepository: Send + Sync {
    /// Exact lookup: `agent_id = None` reads the tool-wide row only.
    async fn get_fallback(&self, tool: &str, agent_id: Option<&str>)
    -> Result<Option<FallbackRecord>>;

    async fn upsert_fallback(
        &self,
        tool: &str,
        agent_id: Option<&str>,
        message: &str,
        updated_by: Option<&str>,
    ) -> Result<()>;
}

#[async_trait]
pub trait ApiTokenRepository: Send + Sync {
    /// Returns the raw token (shown once) and its record.
    async fn create_api_token(&self, user_id: &str, name: &str)
    -> Result<(String, ApiTokenRecord)>;

    async fn list_api_tokens(&self, user_id: &str) -> Result<Vec<ApiTokenRecord>>;

    async fn delete_api_token(&self, user_id: &str, id: &str) -> Result<bool>;

    /// Resolve a raw bearer token to its owning user.
    async fn resolve_api_token(&self, raw_token: &str) -> Result<Option<String>>;
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn create_agent(&self, user_id: &str, name: &str, persona: &str) -> Result<AgentRecord>;

    async fn list_agents(&self, user_id: &str) -> Result<Vec<AgentRecord>>;

    async fn get_agent(&self, id: &str) -> Result<Option<AgentRecord>>;

    async fn delete_agent(&self, user_id: &str, id: &str) -> Result<bool>;
}

#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// Append `(role, content)` pairs in one transaction.
    async fn append_chat_messages(
        &self,
        agent_id: &str,
        user_id: &str,
        messages: &[(&str, &str)],
    ) -> Result<()>;

    /// The most recent `limit` messages, oldest first.
    async fn list_chat_messages(&self, agent_id: &str, limit: usize)
    -> Result<Vec<ChatMessageRecord>>;
}

#[async_trait]
pub trait DeadLetterRepository: Send + Sync {
    async fn insert_dead_letter(&self, kind: &str, payload: &str, error: &str) -> Result<()>;

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterRecord>>;
}
