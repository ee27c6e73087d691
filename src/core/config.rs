use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

pub const DEFAULT_API_HOST: &str = "127.0.0.1";
pub const DEFAULT_API_PORT: u16 = 17890;
pub const DEFAULT_TASK_RETENTION_DAYS: i64 = 30;
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// OAuth client registration for one tool. Endpoint overrides are optional;
/// when absent the provider's public endpoints are used.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub revoke_url: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_LLM_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub api_host: String,
    pub api_port: u16,
    /// Externally reachable base URL, used to build the OAuth redirect URI.
    pub public_url: Option<String>,
    /// Where the browser lands after an OAuth callback.
    pub dashboard_url: Option<String>,
    pub cron_secret_token: Option<String>,
    pub encryption_key: Option<String>,
    /// Six-field cron expression for the in-process due-task trigger.
    pub internal_cron: Option<String>,
    pub task_retention_days: i64,
    pub llm: LlmSettings,
    pub providers: HashMap<String, ProviderSettings>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            api_host: DEFAULT_API_HOST.to_string(),
            api_port: DEFAULT_API_PORT,
            public_url: None,
            dashboard_url: None,
            cron_secret_token: None,
            encryption_key: None,
            internal_cron: None,
            task_retention_days: DEFAULT_TASK_RETENTION_DAYS,
            llm: LlmSettings::default(),
            providers: HashMap::new(),
        }
    }
}

impl PortalConfig {
    /// Defaults, then `<data_dir>/config.toml`, then environment variables.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("config.toml");
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Self::from_toml(&raw).with_context(|| format!("invalid {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub(crate) fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("PORTAL_API_HOST") {
            self.api_host = host;
        }
        if let Some(port) = get("PORTAL_API_PORT") {
            match port.parse() {
                Ok(p) => self.api_port = p,
                Err(_) => warn!("Ignoring invalid PORTAL_API_PORT '{}'", port),
            }
        }
        if let Some(url) = get("PORTAL_PUBLIC_URL") {
            self.public_url = Some(url);
        }
        if let Some(url) = get("PORTAL_DASHBOARD_URL") {
            self.dashboard_url = Some(url);
        }
        if let Some(secret) = get("CRON_SECRET_TOKEN") {
            self.cron_secret_token = Some(secret);
        }
        if let Some(key) = get("PORTAL_ENCRYPTION_KEY") {
            self.encryption_key = Some(key);
        }
        if let Some(expr) = get("PORTAL_INTERNAL_CRON") {
            self.internal_cron = Some(expr);
        }
        if let Some(days) = get("PORTAL_TASK_RETENTION_DAYS") {
            match days.parse::<i64>() {
                Ok(d) if d >= 0 => self.task_retention_days = d,
                _ => warn!("Ignoring invalid PORTAL_TASK_RETENTION_DAYS '{}'", days),
            }
        }
        if let Some(url) = get("LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(key) = get("LLM_API_KEY").or_else(|| get("OPENAI_API_KEY")) {
            self.llm.api_key = Some(key);
        }
        if let Some(model) = get("LLM_MODEL") {
            self.llm.model = model;
        }

        for tool in crate::core::integrations::KNOWN_TOOLS {
            let prefix = tool.to_uppercase();
            let id = get(&format!("{}_CLIENT_ID", prefix));
            let secret = get(&format!("{}_CLIENT_SECRET", prefix));
            if id.is_none() && secret.is_none() {
                continue;
            }
            let entry = self.providers.entry(tool.to_string()).or_default();
            if let Some(id) = id {
                entry.client_id = id;
            }
            if let Some(secret) = secret {
                entry.client_secret = secret;
            }
        }
    }

    pub fn public_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.api_host, self.api_port))
            .trim_end_matches('/')
            .to_string()
    }

    pub fn dashboard_url(&self) -> String {
        self.dashboard_url
            .clone()
            .unwrap_or_else(|| self.public_url())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn oauth_redirect_uri(&self) -> String {
        format!("{}/api/integrations/oauth/callback", self.public_url())
    }

    pub fn provider(&self, tool: &str) -> ProviderSettings {
        self.providers.get(tool).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_loopback() {
        let cfg = PortalConfig::default();
        assert_eq!(cfg.api_host, "127.0.0.1");
        assert_eq!(cfg.api_port, 17890);
        assert_eq!(cfg.task_retention_days, 30);
        assert_eq!(cfg.public_url(), "http://127.0.0.1:17890");
        assert_eq!(
            cfg.oauth_redirect_uri(),
            "http://127.0.0.1:17890/api/integrations/oauth/callback"
        );
    }

    #[test]
    fn toml_overrides_defaults() {
        let cfg = PortalConfig::from_toml(
            r#"
api_port = 9000
public_url = "https://portal.example.com/"
cron_secret_token = "s3cret"

[llm]
model = "gpt-4o"

[providers.slack]
client_id = "slack-id"
client_secret = "slack-secret"
token_url = "http://127.0.0.1:1/token"
"#,
        )
        .unwrap();
        assert_eq!(cfg.api_port, 9000);
        assert_eq!(cfg.public_url(), "https://portal.example.com");
        assert_eq!(cfg.dashboard_url(), "https://portal.example.com");
        assert_eq!(cfg.cron_secret_token.as_deref(), Some("s3cret"));
        assert_eq!(cfg.llm.model, "gpt-4o");
        assert_eq!(cfg.llm.base_url, DEFAULT_LLM_BASE_URL);
        let slack = cfg.provider("slack");
        assert_eq!(slack.client_id, "slack-id");
        assert_eq!(slack.token_url.as_deref(), Some("http://127.0.0.1:1/token"));
        assert!(cfg.provider("gmail").client_id.is_empty());
    }

    #[test]
    fn env_overrides_toml() {
        let mut cfg = PortalConfig::default();
        let env: HashMap<&str, &str> = [
            ("PORTAL_API_PORT", "8080"),
            ("CRON_SECRET_TOKEN", "cron-token"),
            ("OPENAI_API_KEY", "sk-test"),
            ("GMAIL_CLIENT_ID", "gmail-id"),
            ("GMAIL_CLIENT_SECRET", "gmail-secret"),
            ("PORTAL_TASK_RETENTION_DAYS", "7"),
        ]
        .into_iter()
        .collect();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.api_port, 8080);
        assert_eq!(cfg.cron_secret_token.as_deref(), Some("cron-token"));
        assert_eq!(cfg.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.provider("gmail").client_secret, "gmail-secret");
        assert_eq!(cfg.task_retention_days, 7);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut cfg = PortalConfig::default();
        cfg.apply_env(|k| match k {
            "PORTAL_API_PORT" => Some("not-a-port".to_string()),
            "PORTAL_TASK_RETENTION_DAYS" => Some("-3".to_string()),
            "CRON_SECRET_TOKEN" => Some("   ".to_string()),
            _ => None,
        });
        assert_eq!(cfg.api_port, DEFAULT_API_PORT);
        assert_eq!(cfg.task_retention_days, DEFAULT_TASK_RETENTION_DAYS);
        assert!(cfg.cron_secret_token.is_none());
    }
}
