use anyhow::Result;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

use crate::core::store::types::ErrorRecord;
use crate::core::store::{ErrorRepository, FallbackRepository};

pub const DEFAULT_WINDOW_DAYS: i64 = 30;
pub const DEFAULT_TOP_CODES: usize = 10;
pub const MAX_WINDOW_DAYS: i64 = 365;
pub const MAX_TOP_CODES: usize = 1000;

const GENERIC_FALLBACK: &str =
    "This integration is temporarily unavailable. Please try again later.";

/// Built-in message for a tool when nothing is configured.
pub fn default_fallback_message(tool: &str) -> &'static str {
    match tool {
        "gmail" => "Email is temporarily unavailable. Your message was not sent; please try again later.",
        "slack" => "Slack is temporarily unavailable. Please try again in a few minutes.",
        "notion" => "Notion is temporarily unavailable. Your page could not be updated right now.",
        "asana" => "Asana is temporarily unavailable. Your task could not be synced right now.",
        "llm" => "I'm having trouble responding right now. Please try again in a moment.",
        _ => GENERIC_FALLBACK,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FallbackError {
    #[error("tool is required")]
    MissingTool,
    #[error("message is required")]
    EmptyMessage,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendPoint {
    pub date: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorCodeCount {
    pub error_code: String,
    pub count: i64,
}

/// First instant of the trailing `days`-day window ending today (UTC).
/// `days` is clamped to `1..=MAX_WINDOW_DAYS`.
fn window_start(days: i64, now: DateTime<Utc>) -> DateTime<Utc> {
    let days = days.clamp(1, MAX_WINDOW_DAYS);
    (now.date_naive() - Duration::days(days - 1))
        .and_time(NaiveTime::MIN)
        .and_utc()
}

/// Records integration failures and answers the dashboard's error queries.
pub struct ErrorHandler {
    errors: Arc<dyn ErrorRepository>,
    fallbacks: Arc<dyn FallbackRepository>,
}

impl ErrorHandler {
    pub fn new(errors: Arc<dyn ErrorRepository>, fallbacks: Arc<dyn FallbackRepository>) -> Self {
        Self { errors, fallbacks }
    }

    pub async fn record_error(
        &self,
        tool: &str,
        agent_id: Option<&str>,
        error_code: &str,
        message: &str,
    ) -> Result<ErrorRecord> {
        warn!(
            tool = tool,
            code = error_code,
            "Integration error: {}",
            message
        );
        self.errors
            .insert_error(tool, agent_id, error_code, message, Utc::now())
            .await
    }

    pub async fn list_errors(
        &self,
        limit: usize,
        tool: Option<&str>,
        include_resolved: bool,
    ) -> Result<Vec<ErrorRecord>> {
        self.errors.list_errors(limit, tool, include_resolved).await
    }

    /// Daily error counts over the trailing window, oldest first, one entry
    /// per UTC day including days with no errors.
    pub async fn get_error_trends(&self, days: i64, tool: Option<&str>) -> Result<Vec<TrendPoint>> {
        self.error_trends_at(days, tool, Utc::now()).await
    }

    pub(crate) async fn error_trends_at(
        &self,
        days: i64,
        tool: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrendPoint>> {
        let days = days.clamp(1, MAX_WINDOW_DAYS);
        let start = window_start(days, now);
        let counts: HashMap<String, i64> = self
            .errors
            .count_errors_by_day(start, tool)
            .await?
            .into_iter()
            .collect();

        let first_day = start.date_naive();
        Ok((0..days)
            .map(|offset| {
                let date = (first_day + Duration::days(offset))
                    .format("%Y-%m-%d")
                    .to_string();
                let count = counts.get(&date).copied().unwrap_or(0);
                TrendPoint { date, count }
            })
            .collect())
    }

    pub async fn get_error_stats_by_tool(&self, days: i64) -> Result<BTreeMap<String, i64>> {
        let start = window_start(days, Utc::now());
        Ok(self
            .errors
            .count_errors_by_tool(start)
            .await?
            .into_iter()
            .collect())
    }

    pub async fn get_most_frequent_error_codes(
        &self,
        limit: usize,
        days: i64,
    ) -> Result<Vec<ErrorCodeCount>> {
        let start = window_start(days, Utc::now());
        Ok(self
            .errors
            .count_errors_by_code(start, limit)
            .await?
            .into_iter()
            .map(|(error_code, count)| ErrorCodeCount { error_code, count })
            .collect())
    }

    /// Agent override, then the tool-wide message, then the built-in text.
    /// Never empty.
    pub async fn get_fallback_message(&self, tool: &str, agent_id: Option<&str>) -> Result<String> {
        let mut scopes = Vec::with_capacity(2);
        if let Some(agent) = agent_id.filter(|a| !a.is_empty()) {
            scopes.push(Some(agent));
        }
        scopes.push(None);

        for scope in scopes {
            if let Some(rec) = self.fallbacks.get_fallback(tool, scope).await? {
                if !rec.message.trim().is_empty() {
                    return Ok(rec.message);
                }
            }
        }
        Ok(default_fallback_message(tool).to_string())
    }

    pub async fn set_fallback_message(
        &self,
        tool: &str,
        message: &str,
        agent_id: Option<&str>,
        updated_by: Option<&str>,
    ) -> Result<(), FallbackError> {
        if tool.trim().is_empty() {
            return Err(FallbackError::MissingTool);
        }
        let message = message.trim();
        if message.is_empty() {
            return Err(FallbackError::EmptyMessage);
        }
        let agent_id = agent_id.filter(|a| !a.is_empty());
        self.fallbacks
            .upsert_fallback(tool, agent_id, message, updated_by)
            .await?;
        Ok(())
    }

    pub async fn bulk_resolve_errors(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.errors.resolve_errors(ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::test_store;
    use chrono::TimeZone;

    fn handler() -> (ErrorHandler, Arc<crate::core::store::SqliteStore>) {
        let store = test_store();
        (ErrorHandler::new(store.clone(), store.clone()), store)
    }

    #[test]
    fn window_starts_at_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 3, 20, 15, 30, 0).unwrap();
        assert_eq!(
            window_start(7, now),
            Utc.with_ymd_and_hms(2024, 3, 14, 0, 0, 0).unwrap()
        );
        assert_eq!(
            window_start(0, now),
            Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap()
        );
        assert_eq!(window_start(i64::MAX, now), window_start(MAX_WINDOW_DAYS, now));
    }

    #[tokio::test]
    async fn oversized_windows_are_clamped() {
        let (h, _store) = handler();
        let now = Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap();
        let trends = h.error_trends_at(1_000_000_000, None, now).await.unwrap();
        assert_eq!(trends.len(), MAX_WINDOW_DAYS as usize);
        assert_eq!(trends.last().unwrap().date, "2024-03-20");
        assert!(h.get_error_stats_by_tool(i64::MAX).await.unwrap().is_empty());
        assert!(
            h.get_most_frequent_error_codes(10, 1_000_000_000)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn trends_are_zero_filled_and_oldest_first() {
        let (h, store) = handler();
        let now = Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap();
        for at in [
            Utc.with_ymd_and_hms(2024, 3, 18, 1, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 20, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 20, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
        ] {
            store
                .insert_error("gmail", None, "UPSTREAM_ERROR", "x", at)
                .await
                .unwrap();
        }

        let trends = h.error_trends_at(3, None, now).await.unwrap();
        assert_eq!(
            trends,
            vec![
                TrendPoint { date: "2024-03-18".into(), count: 1 },
                TrendPoint { date: "2024-03-19".into(), count: 0 },
                TrendPoint { date: "2024-03-20".into(), count: 2 },
            ]
        );

        let slack = h.error_trends_at(3, Some("slack"), now).await.unwrap();
        assert_eq!(slack.len(), 3);
        assert!(slack.iter().all(|p| p.count == 0));
    }

    #[tokio::test]
    async fn stats_and_top_codes() {
        let (h, _) = handler();
        h.record_error("gmail", None, "TOKEN_EXPIRED", "a").await.unwrap();
        h.record_error("gmail", Some("agent-1"), "UPSTREAM_ERROR", "b").await.unwrap();
        h.record_error("slack", None, "UPSTREAM_ERROR", "c").await.unwrap();

        let by_tool = h.get_error_stats_by_tool(30).await.unwrap();
        assert_eq!(by_tool.get("gmail"), Some(&2));
        assert_eq!(by_tool.get("slack"), Some(&1));

        let codes = h.get_most_frequent_error_codes(10, 30).await.unwrap();
        assert_eq!(
            codes[0],
            ErrorCodeCount { error_code: "UPSTREAM_ERROR".into(), count: 2 }
        );
        assert_eq!(codes.len(), 2);
        assert_eq!(h.get_most_frequent_error_codes(1, 30).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fallback_resolution_order() {
        let (h, _) = handler();
        assert_eq!(
            h.get_fallback_message("slack", Some("agent-1")).await.unwrap(),
            default_fallback_message("slack")
        );
        assert_eq!(
            h.get_fallback_message("trello", None).await.unwrap(),
            GENERIC_FALLBACK
        );

        h.set_fallback_message("slack", "Slack is down", None, Some("admin"))
            .await
            .unwrap();
        assert_eq!(
            h.get_fallback_message("slack", Some("agent-1")).await.unwrap(),
            "Slack is down"
        );

        h.set_fallback_message("slack", "Agent 1 says sorry", Some("agent-1"), None)
            .await
            .unwrap();
        assert_eq!(
            h.get_fallback_message("slack", Some("agent-1")).await.unwrap(),
            "Agent 1 says sorry"
        );
        assert_eq!(
            h.get_fallback_message("slack", Some("agent-2")).await.unwrap(),
            "Slack is down"
        );
    }

    #[tokio::test]
    async fn empty_fallback_is_rejected() {
        let (h, _) = handler();
        assert!(matches!(
            h.set_fallback_message("gmail", "   ", None, None).await,
            Err(FallbackError::EmptyMessage)
        ));
        assert!(matches!(
            h.set_fallback_message("", "hi", None, None).await,
            Err(FallbackError::MissingTool)
        ));
    }

    #[tokio::test]
    async fn bulk_resolve_counts_known_ids() {
        let (h, _) = handler();
        let a = h.record_error("gmail", None, "X", "a").await.unwrap();
        let b = h.record_error("gmail", None, "X", "b").await.unwrap();
        let resolved = h
            .bulk_resolve_errors(&[a.id, b.id, "nope".to_string()])
            .await
            .unwrap();
        assert_eq!(resolved, 2);
        assert!(h.list_errors(10, None, false).await.unwrap().is_empty());
        assert_eq!(h.bulk_resolve_errors(&[]).await.unwrap(), 0);
    }
}
