//! Ollama LLM Provider
//!
//! Talks to a local Ollama server (typically http://localhost:11434) through
//! `/api/chat` with native tool definitions. Ollama has no way to require a
//! tool, so forced tool use is expressed as a trailing system instruction.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::{
    parse_text_tool_call, Completion, LLMError, LLMProvider, Message, MessageRole, Result,
    ToolCall, ToolSchema,
};

const FORCE_TOOL_INSTRUCTION: &str =
    "You must respond by calling exactly one of the provided tools. Do not answer in plain text.";

/// Ollama provider
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    /// Base URL for Ollama API (typically http://localhost:11434)
    base_url: String,

    /// HTTP client for API requests
    client: Client,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Convert our Message format to Ollama's format
    fn convert_messages(&self, messages: &[Message], force_tool_use: bool) -> Vec<OllamaMessage> {
        let mut converted: Vec<OllamaMessage> = messages
            .iter()
            .map(|msg| OllamaMessage {
                role: msg.role.to_string(),
                content: match msg.role {
                    MessageRole::User | MessageRole::System => msg.rendered_content(),
                    _ => msg.content.clone(),
                },
                tool_calls: msg
                    .tool_calls
                    .iter()
                    .map(|tc| OllamaToolCall {
                        function: OllamaFunction {
                            name: tc.name.clone(),
                            arguments: serde_json::from_str(&tc.arguments)
                                .unwrap_or_else(|_| Value::Object(Default::default())),
                        },
                    })
                    .collect(),
            })
            .collect();

        if force_tool_use {
            converted.push(OllamaMessage {
                role: "system".to_string(),
                content: FORCE_TOOL_INSTRUCTION.to_string(),
                tool_calls: Vec::new(),
            });
        }

        converted
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn check_health(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        matches!(self.client.get(&url).send().await, Ok(r) if r.status().is_success())
    }

    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        tools: Option<&[ToolSchema]>,
        force_tool_use: bool,
    ) -> Result<Completion> {
        let tools = tools.filter(|t| !t.is_empty());
        let ollama_messages = self.convert_messages(messages, force_tool_use && tools.is_some());

        tracing::debug!(
            "Ollama request: model={}, messages={}, total_chars={}",
            model,
            ollama_messages.len(),
            ollama_messages
                .iter()
                .map(|m| m.content.len())
                .sum::<usize>()
        );

        let request = OllamaRequest {
            model: model.to_string(),
            messages: ollama_messages,
            tools: tools
                .map(|tools| {
                    tools
                        .iter()
                        .map(|t| OllamaTool {
                            kind: "function",
                            function: OllamaToolDefinition {
                                name: t.name.clone(),
                                description: t.description.clone(),
                                parameters: t.parameters.clone(),
                            },
                        })
                        .collect()
                })
                .unwrap_or_default(),
            stream: false,
        };

        let url = format!("{}/api/chat", self.base_url);
        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else if e.is_connect() {
                    LLMError::ProviderUnavailable(format!(
                        "Cannot connect to Ollama at {}. Is Ollama running?",
                        self.base_url
                    ))
                } else {
                    LLMError::NetworkError(e.to_string())
                }
            })?;

        tracing::info!(
            "Ollama response received in {:.1}s",
            start.elapsed().as_secs_f64()
        );

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LLMError::ProviderUnavailable(format!(
                "Ollama API error ({}): {}",
                status, error_text
            )));
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(format!("Failed to parse Ollama response: {}", e)))?;

        let message = ollama_response.message;
        let mut tool_calls: Vec<ToolCall> = message
            .tool_calls
            .into_iter()
            .map(|tc| ToolCall::generated(tc.function.name, tc.function.arguments.to_string()))
            .collect();

        // Smaller local models often write the call into the text instead
        if tool_calls.is_empty() && tools.is_some() {
            if let Some(call) = parse_text_tool_call(&message.content) {
                tool_calls.push(call);
            }
        }

        let content = Some(message.content).filter(|c| !c.is_empty());
        Ok(Completion {
            content,
            tool_calls,
        })
    }
}

/// Ollama API request format
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OllamaTool>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OllamaTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: OllamaToolDefinition,
}

#[derive(Debug, Serialize)]
struct OllamaToolDefinition {
    name: String,
    description: String,
    parameters: Value,
}

/// Ollama message format
#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Ollama API response format
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
    #[allow(dead_code)]
    #[serde(default)]
    done: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_conversion() {
        let provider = OllamaProvider::new("http://localhost:11434");

        let messages = vec![
            Message::system("You are an entity"),
            Message::user("Hello").with_origin(Some("sms".to_string()), None),
            Message::assistant("Hi there"),
        ];

        let converted = provider.convert_messages(&messages, false);

        assert_eq!(converted.len(), 3);
        assert_eq!(converted[0].role, "system");
        assert_eq!(converted[1].content, "[sms] Hello");
        assert_eq!(converted[2].role, "assistant");
    }

    #[test]
    fn test_forced_tool_use_appends_instruction() {
        let provider = OllamaProvider::new("http://localhost:11434");
        let converted = provider.convert_messages(&[Message::user("hi")], true);

        assert_eq!(converted.len(), 2);
        assert_eq!(converted[1].role, "system");
        assert_eq!(converted[1].content, FORCE_TOOL_INSTRUCTION);
    }

    #[test]
    fn test_tool_call_arguments_become_objects() {
        let provider = OllamaProvider::new("http://localhost:11434");
        let mut assistant = Message::assistant("");
        assistant.tool_calls = vec![ToolCall::new("c1", "sleep", r#"{"minutes":5}"#)];

        let converted = provider.convert_messages(&[assistant], false);
        assert_eq!(converted[0].tool_calls[0].function.arguments["minutes"], 5);
    }
}
