mod agents;
mod chat;
mod credentials;
mod dead_letters;
mod errors;
mod fallbacks;
mod oauth_states;
mod tasks;
mod tokens;
pub mod traits;
pub mod types;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::vault::TokenCipher;
use crate::platform::{NativePlatform, Platform};

pub use traits::{
    AgentRepository, ApiTokenRepository, ChatRepository, CredentialRepository,
    DeadLetterRepository, ErrorRepository, FallbackRepository, OAuthStateRepository,
    TaskRepository,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS api_tokens (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        name TEXT NOT NULL,
        token_hash TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS integration_credentials (
        user_id TEXT NOT NULL,
        tool_name TEXT NOT NULL,
        access_token TEXT NOT NULL,
        refresh_token TEXT,
        expires_at TEXT,
        scopes TEXT NOT NULL DEFAULT '[]',
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (user_id, tool_name)
    )",
    "CREATE TABLE IF NOT EXISTS oauth_states (
        csrf_token TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        tool_name TEXT NOT NULL,
        expires_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS scheduled_tasks (
        id TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        tool TEXT NOT NULL,
        intent TEXT NOT NULL,
        context TEXT NOT NULL DEFAULT '{}',
        scheduled_time TEXT NOT NULL,
        status TEXT NOT NULL,
        result TEXT,
        error TEXT,
        worker_token TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_status_time ON scheduled_tasks(status, scheduled_time)",
    "CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_agent ON scheduled_tasks(agent_id, scheduled_time)",
    "CREATE TABLE IF NOT EXISTS error_records (
        id TEXT PRIMARY KEY,
        tool TEXT NOT NULL,
        agent_id TEXT,
        error_code TEXT NOT NULL,
        message TEXT NOT NULL,
        created_at TEXT NOT NULL,
        resolved INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_error_records_created ON error_records(created_at)",
    "CREATE TABLE IF NOT EXISTS fallback_messages (
        tool TEXT NOT NULL,
        agent_key TEXT NOT NULL DEFAULT '',
        message TEXT NOT NULL,
        updated_by TEXT,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (tool, agent_key)
    )",
    "CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        name TEXT NOT NULL,
        persona TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS chat_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        agent_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_chat_messages_agent ON chat_messages(agent_id, id)",
    "CREATE TABLE IF NOT EXISTS dead_letters (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        payload TEXT NOT NULL,
        error TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
];

/// The portal's only data-access implementation. Components see it through
/// the repository traits in [`traits`].
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
    cipher: TokenCipher,
}

impl SqliteStore {
    pub async fn open<P: AsRef<Path>>(data_dir: P, cipher: TokenCipher) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        if !data_dir.exists() {
            tokio::fs::create_dir_all(data_dir).await?;
        }
        NativePlatform::restrict_dir_permissions(data_dir);

        let db_path = data_dir.join("portal.db");
        let db = Connection::open(&db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        NativePlatform::restrict_file_permissions(&db_path);
        info!("Opened portal database at {}", db_path.display());

        Self::with_connection(db, cipher)
    }

    pub fn open_in_memory(cipher: TokenCipher) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, cipher)
    }

    fn with_connection(db: Connection, cipher: TokenCipher) -> Result<Self> {
        db.pragma_update(None, "journal_mode", "WAL").ok();
        for stmt in SCHEMA {
            db.execute(stmt, [])?;
        }
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            cipher,
        })
    }
}

pub(crate) fn to_db_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn from_db_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn now_db_time() -> String {
    to_db_time(Utc::now())
}

/// In-memory store for tests. The cipher uses a fixed key.
#[cfg(test)]
pub fn test_store() -> Arc<SqliteStore> {
    let cipher = TokenCipher::new(Some("test-encryption-key")).expect("cipher");
    Arc::new(SqliteStore::open_in_memory(cipher).expect("in-memory store"))
}

#[cfg(test)]
impl SqliteStore {
    /// Pretend a task's last write happened at `at`.
    pub async fn backdate_task(&self, id: &str, at: DateTime<Utc>) {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE scheduled_tasks SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![to_db_time(at), id],
        )
        .expect("backdate task");
    }
}
