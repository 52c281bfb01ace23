//! Language-Model Backend Abstraction
//!
//! This module defines the contract the entity run loop holds the backend to:
//! one completion per call, optionally offered a set of tool schemas and
//! optionally forced to pick one of them. The `LLMProvider` trait is
//! implemented by the OpenAI-compatible and Ollama providers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::LLMConfig;

pub mod ollama;
pub mod openai;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<reqwest::Error> for LLMError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LLMError::Timeout
        } else if err.is_connect() {
            LLMError::ProviderUnavailable(err.to_string())
        } else {
            LLMError::NetworkError(err.to_string())
        }
    }
}

/// Message in a conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender (user, assistant, system, tool)
    pub role: MessageRole,

    /// Content of the message
    pub content: String,

    /// Tool invocations requested by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Tool call ID for tool result messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Channel a user message arrived on (e.g. "sms")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Identity of the author of a user message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

impl Message {
    fn with_role(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            channel: None,
            sender: None,
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content)
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, content)
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, content)
    }

    /// Create a new tool result message
    pub fn tool_result(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(MessageRole::Tool, content)
        }
    }

    /// Tag a message with the channel and author it came from
    pub fn with_origin(mut self, channel: Option<String>, sender: Option<String>) -> Self {
        self.channel = channel;
        self.sender = sender;
        self
    }

    /// Content as presented to the backend, with any origin metadata prefixed.
    pub fn rendered_content(&self) -> String {
        match (&self.channel, &self.sender) {
            (Some(channel), Some(sender)) => format!("[{} from {}] {}", channel, sender, self.content),
            (Some(channel), None) => format!("[{}] {}", channel, self.content),
            (None, Some(sender)) => format!("[from {}] {}", sender, self.content),
            (None, None) => self.content.clone(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User message
    User,

    /// Assistant message
    Assistant,

    /// System message
    System,

    /// Tool result message
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Tool call request from the LLM
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,

    /// Name of the tool to call
    pub name: String,

    /// Arguments to pass to the tool (JSON string)
    pub arguments: String,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Create a tool call with a freshly generated id
    pub fn generated(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self::new(format!("call_{}", uuid::Uuid::new_v4()), name, arguments)
    }
}

/// Function schema offered to the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema object describing the arguments
    pub parameters: serde_json::Value,
}

/// One backend response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    /// Free text, if the backend produced any
    pub content: Option<String>,

    /// Requested tool invocations, in the order the backend listed them
    pub tool_calls: Vec<ToolCall>,
}

impl Completion {
    /// A text-only completion
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    /// A completion requesting a single tool invocation
    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            content: None,
            tool_calls: vec![call],
        }
    }

    /// Content with surrounding whitespace removed; `None` when blank.
    pub fn text_content(&self) -> Option<&str> {
        self.content
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Convert into the assistant message recorded in memory.
    pub fn into_message(self) -> Message {
        Message {
            tool_calls: self.tool_calls,
            ..Message::assistant(self.content.unwrap_or_default())
        }
    }
}

/// LLM Provider trait that all backends must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "openai", "ollama")
    fn name(&self) -> &str;

    /// Request one completion
    ///
    /// # Arguments
    /// * `model` - Model identifier, chosen per entity
    /// * `messages` - Full conversation context, system prompt first
    /// * `tools` - Schemas the model may invoke; `None` exposes no tools
    /// * `force_tool_use` - Require the model to select exactly one tool
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        tools: Option<&[ToolSchema]>,
        force_tool_use: bool,
    ) -> Result<Completion>;

    /// Check if the provider is currently healthy and available
    async fn check_health(&self) -> bool {
        true
    }
}

/// Build the backend selected by `default_provider`.
pub fn build_provider(config: &LLMConfig) -> Arc<dyn LLMProvider> {
    match config.default_provider.as_str() {
        "ollama" => Arc::new(ollama::OllamaProvider::new(config.ollama.base_url.clone())),
        _ => Arc::new(openai::OpenAIProvider::from_config(&config.openai)),
    }
}

/// Recover a tool call a model wrote into its text instead of the native field.
///
/// Handles:
/// 1. Raw JSON: `{"function": "...", "arguments": {...}}` (or `"name"` instead of `"function"`)
/// 2. Fenced JSON: ` ```json\n{...}\n``` `
/// 3. JSON embedded in prose
pub fn parse_text_tool_call(content: &str) -> Option<ToolCall> {
    let trimmed = content.trim();

    if let Some(tc) = try_parse_function_json(trimmed) {
        return Some(tc);
    }

    if let Some(inner) = extract_fenced_json(trimmed) {
        if let Some(tc) = try_parse_function_json(inner.trim()) {
            return Some(tc);
        }
    }

    let start = trimmed.find('{')?;
    let json_str = extract_balanced_json(&trimmed[start..])?;
    try_parse_function_json(json_str)
}

fn try_parse_function_json(s: &str) -> Option<ToolCall> {
    let json: serde_json::Value = serde_json::from_str(s).ok()?;
    let function = json
        .get("function")
        .or_else(|| json.get("name"))?
        .as_str()?;
    let arguments = match json.get("arguments") {
        Some(serde_json::Value::String(raw)) => raw.clone(),
        Some(value) => value.to_string(),
        None => "{}".to_string(),
    };
    Some(ToolCall::generated(function, arguments))
}

/// Body of the first markdown code fence, even with trailing prose.
fn extract_fenced_json(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start = fence_start + 3 + after_opening.find('\n')? + 1;
    let body_end = body_start + content[body_start..].find("```")?;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Balanced JSON object at the start of `s`, respecting string literals.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
