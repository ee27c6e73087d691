use async_trait::async_trait;
use serde_json::{Value, json};

use super::{
    IntegrationAdapter, IntegrationError, bounded_u64, optional_str, read_json, required_str,
};

pub const DEFAULT_API_BASE: &str = "https://app.asana.com/api/1.0";
const TASK_FIELDS: &str = "name,completed,due_on,assignee.name,permalink_url";

pub struct AsanaAdapter {
    http: reqwest::Client,
    api_base: String,
}

impl AsanaAdapter {
    pub fn new(api_base: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }
}

/// `projects` may be a single id, a comma list or a JSON array.
fn project_ids(params: &Value) -> Vec<String> {
    match params.get("projects") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl IntegrationAdapter for AsanaAdapter {
    fn tool_name(&self) -> &'static str {
        "asana"
    }

    async fn send(&self, access_token: &str, params: &Value) -> Result<Value, IntegrationError> {
        let name = required_str(params, "name")?;
        let workspace = optional_str(params, "workspace");
        let projects = project_ids(params);
        if workspace.is_none() && projects.is_empty() {
            return Err(IntegrationError::InvalidParams(
                "workspace or projects is required".to_string(),
            ));
        }

        let mut data = json!({ "name": name });
        if let Some(notes) = optional_str(params, "notes") {
            data["notes"] = json!(notes);
        }
        if let Some(workspace) = workspace {
            data["workspace"] = json!(workspace);
        }
        if !projects.is_empty() {
            data["projects"] = json!(projects);
        }
        if let Some(due_on) = optional_str(params, "dueOn") {
            data["due_on"] = json!(due_on);
        }
        if let Some(assignee) = optional_str(params, "assignee") {
            data["assignee"] = json!(assignee);
        }

        let response = self
            .http
            .post(format!("{}/tasks", self.api_base))
            .bearer_auth(access_token)
            .json(&json!({ "data": data }))
            .send()
            .await?;
        let created = read_json(response).await?;
        let task = created.get("data").cloned().unwrap_or(Value::Null);
        Ok(json!({
            "taskId": task.get("gid").cloned().unwrap_or(Value::Null),
            "name": task.get("name").cloned().unwrap_or(Value::Null),
            "url": task.get("permalink_url").cloned().unwrap_or(Value::Null),
        }))
    }

    async fn fetch(&self, access_token: &str, params: &Value) -> Result<Value, IntegrationError> {
        let limit = bounded_u64(params, "limit", 20, 100).to_string();
        let request = if let Some(project) = optional_str(params, "project") {
            self.http
                .get(format!("{}/projects/{}/tasks", self.api_base, project))
                .query(&[("limit", limit.as_str()), ("opt_fields", TASK_FIELDS)])
        } else {
            let workspace = required_str(params, "workspace").map_err(|_| {
                IntegrationError::InvalidParams("project or workspace is required".to_string())
            })?;
            let assignee = optional_str(params, "assignee").unwrap_or("me");
            self.http.get(format!("{}/tasks", self.api_base)).query(&[
                ("workspace", workspace),
                ("assignee", assignee),
                ("limit", limit.as_str()),
                ("opt_fields", TASK_FIELDS),
            ])
        };

        let response = request.bearer_auth(access_token).send().await?;
        let listing = read_json(response).await?;
        Ok(json!({
            "tasks": listing.get("data").cloned().unwrap_or_else(|| json!([])),
        }))
    }
}
