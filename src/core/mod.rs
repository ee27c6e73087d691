pub mod chat;
pub mod config;
pub mod error_handler;
pub mod integrations;
pub mod lifecycle;
pub mod llm;
pub mod oauth;
pub mod scheduler;
pub mod store;
pub mod terminal;
pub mod vault;
