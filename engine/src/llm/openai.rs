//! OpenAI-compatible chat completions provider
//!
//! Speaks the `/chat/completions` function-calling dialect. Forced tool use
//! maps to `tool_choice: "required"`.

use super::{parse_text_tool_call, Completion, LLMError, LLMProvider, Message, MessageRole, ToolCall, ToolSchema};
use crate::config::OpenAIConfig;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;

pub struct OpenAIProvider {
    base_url: String,
    api_key_env: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// Create a provider that reads its key from `api_key_env` on every request
    pub fn new(base_url: impl Into<String>, api_key_env: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key_env: api_key_env.into(),
            api_key: None,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    pub fn from_config(config: &OpenAIConfig) -> Self {
        Self::new(config.base_url.clone(), config.api_key_env.clone())
    }

    /// Use a fixed key instead of the environment
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn resolve_api_key(&self) -> super::Result<String> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }
        std::env::var(&self.api_key_env).map_err(|_| {
            LLMError::AuthenticationFailed(format!(
                "environment variable {} is not set",
                self.api_key_env
            ))
        })
    }
}

/// Build the wire message list.
///
/// A tool request whose result never made it into the history (the run ended
/// on it, or a later call was dropped) is invalid on the wire, so unanswered
/// `tool_calls` are stripped and orphaned tool results are sent as plain text.
fn wire_messages(messages: &[Message]) -> Vec<Value> {
    let answered: HashSet<&str> = messages
        .iter()
        .filter(|m| m.role == MessageRole::Tool)
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    let requested: HashSet<&str> = messages
        .iter()
        .flat_map(|m| m.tool_calls.iter())
        .map(|tc| tc.id.as_str())
        .filter(|id| answered.contains(id))
        .collect();

    messages
        .iter()
        .map(|msg| match msg.role {
            MessageRole::Assistant => {
                let calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .filter(|tc| answered.contains(tc.id.as_str()))
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": { "name": tc.name, "arguments": tc.arguments }
                        })
                    })
                    .collect();
                if calls.is_empty() {
                    json!({ "role": "assistant", "content": msg.content })
                } else {
                    json!({ "role": "assistant", "content": msg.content, "tool_calls": calls })
                }
            }
            MessageRole::Tool => match msg.tool_call_id.as_deref() {
                Some(id) if requested.contains(id) => {
                    json!({ "role": "tool", "tool_call_id": id, "content": msg.content })
                }
                _ => json!({ "role": "user", "content": format!("[tool result] {}", msg.content) }),
            },
            _ => json!({ "role": msg.role.to_string(), "content": msg.rendered_content() }),
        })
        .collect()
}

fn wire_tools(tools: &[ToolSchema]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect()
}

fn parse_completion(data: &Value, tools_offered: bool) -> super::Result<Completion> {
    let message = data
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| LLMError::ParseError("No message in response".to_string()))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .map(str::to_string);

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|c| c.as_array()) {
        for call in calls {
            let function = call
                .get("function")
                .ok_or_else(|| LLMError::ParseError("tool call without function".to_string()))?;
            let name = function
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| LLMError::ParseError("tool call without name".to_string()))?;
            let arguments = match function.get("arguments") {
                Some(Value::String(raw)) => raw.clone(),
                Some(Value::Null) | None => "{}".to_string(),
                Some(other) => other.to_string(),
            };
            let call = match call.get("id").and_then(|i| i.as_str()) {
                Some(id) => ToolCall::new(id, name, arguments),
                None => ToolCall::generated(name, arguments),
            };
            tool_calls.push(call);
        }
    }

    if tool_calls.is_empty() && tools_offered {
        if let Some(call) = content.as_deref().and_then(parse_text_tool_call) {
            tracing::debug!("Recovered tool call '{}' from message text", call.name);
            tool_calls.push(call);
        }
    }

    Ok(Completion {
        content,
        tool_calls,
    })
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn check_health(&self) -> bool {
        self.resolve_api_key().is_ok()
    }

    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        tools: Option<&[ToolSchema]>,
        force_tool_use: bool,
    ) -> super::Result<Completion> {
        let api_key = self.resolve_api_key()?;

        let url = format!("{}/chat/completions", self.base_url);

        let mut payload = json!({
            "model": model,
            "messages": wire_messages(messages),
        });

        let tools = tools.filter(|t| !t.is_empty());
        if let Some(tools) = tools {
            payload["tools"] = Value::Array(wire_tools(tools));
            payload["tool_choice"] = json!(if force_tool_use { "required" } else { "auto" });
        }

        tracing::debug!(
            "OpenAI request: model={}, messages={}, tools={}",
            model,
            messages.len(),
            tools.map_or(0, |t| t.len())
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 | 403 => LLMError::AuthenticationFailed(text),
                429 => LLMError::RateLimitExceeded,
                s if s >= 500 => {
                    LLMError::ProviderUnavailable(format!("OpenAI API error ({}): {}", status, text))
                }
                _ => LLMError::InvalidRequest(text),
            });
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        parse_completion(&data, tools.is_some())
    }
}
