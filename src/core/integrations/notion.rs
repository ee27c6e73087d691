use async_trait::async_trait;
use serde_json::{Value, json};

use super::{
    IntegrationAdapter, IntegrationError, bounded_u64, optional_str, read_json, required_str,
};

pub const DEFAULT_API_BASE: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";

pub struct NotionAdapter {
    http: reqwest::Client,
    api_base: String,
}

impl NotionAdapter {
    pub fn new(api_base: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    fn post(&self, path: &str, access_token: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(access_token)
            .header("Notion-Version", NOTION_VERSION)
    }
}

fn rich_text(content: &str) -> Value {
    json!([{ "type": "text", "text": { "content": content } }])
}

/// One paragraph block per non-empty line.
pub(crate) fn paragraph_blocks(content: &str) -> Vec<Value> {
    content
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .map(|line| {
            json!({
                "object": "block",
                "type": "paragraph",
                "paragraph": { "rich_text": rich_text(line) }
            })
        })
        .collect()
}

#[async_trait]
impl IntegrationAdapter for NotionAdapter {
    fn tool_name(&self) -> &'static str {
        "notion"
    }

    async fn send(&self, access_token: &str, params: &Value) -> Result<Value, IntegrationError> {
        let parent = required_str(params, "parentPageId")?;
        let title = required_str(params, "title")?;
        let mut page = json!({
            "parent": { "page_id": parent },
            "properties": { "title": { "title": rich_text(title) } }
        });
        if let Some(content) = optional_str(params, "content") {
            page["children"] = Value::Array(paragraph_blocks(content));
        }

        let response = self.post("/pages", access_token).json(&page).send().await?;
        let created = read_json(response).await?;
        Ok(json!({
            "pageId": created.get("id").cloned().unwrap_or(Value::Null),
            "url": created.get("url").cloned().unwrap_or(Value::Null),
        }))
    }

    async fn fetch(&self, access_token: &str, params: &Value) -> Result<Value, IntegrationError> {
        let mut search = json!({ "page_size": bounded_u64(params, "limit", 10, 100) });
        if let Some(query) = optional_str(params, "query") {
            search["query"] = json!(query);
        }
        let response = self
            .post("/search", access_token)
            .json(&search)
            .send()
            .await?;
        let found = read_json(response).await?;
        Ok(json!({
            "results": found.get("results").cloned().unwrap_or_else(|| json!([])),
            "hasMore": found.get("has_more").cloned().unwrap_or(json!(false)),
        }))
    }
}
