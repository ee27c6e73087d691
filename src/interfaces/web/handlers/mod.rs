pub mod agents;
pub mod cron;
pub mod dead_letters;
pub mod errors;
pub mod health;
pub mod integrations;
pub mod logs;
pub mod oauth;
pub mod tasks;
