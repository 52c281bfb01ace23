//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use somnus_engine::capability::AdapterCatalog;
use somnus_engine::config::EntityDefaults;
use somnus_engine::db::Database;
use somnus_engine::entity::EntityServices;
use somnus_engine::llm::{Completion, LLMError, LLMProvider, Message, ToolCall, ToolSchema};
use tempfile::TempDir;

/// One request as the provider saw it
#[derive(Debug, Clone)]
pub struct Request {
    pub messages: Vec<Message>,
    pub tool_names: Option<Vec<String>>,
    pub force_tool_use: bool,
}

/// Replays queued completions in order and records every request.
///
/// Once the queue is empty every request gets a fixed text reply.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<Completion, LLMError>>>,
    requests: Mutex<Vec<Request>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before answering, so concurrent callers overlap
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, completion: Completion) -> &Self {
        self.replies.lock().unwrap().push_back(Ok(completion));
        self
    }

    pub fn push_error(&self, error: LLMError) -> &Self {
        self.replies.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Requests made with tools offered, i.e. run turns
    pub fn turn_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.tool_names.is_some())
            .count()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        _model: &str,
        messages: &[Message],
        tools: Option<&[ToolSchema]>,
        force_tool_use: bool,
    ) -> somnus_engine::llm::Result<Completion> {
        self.requests.lock().unwrap().push(Request {
            messages: messages.to_vec(),
            tool_names: tools.map(|t| t.iter().map(|s| s.name.clone()).collect()),
            force_tool_use,
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(Completion::text("Nothing much happened.")))
    }
}

pub fn services_with(provider: &Arc<ScriptedProvider>) -> Arc<EntityServices> {
    let provider: Arc<dyn LLMProvider> = Arc::clone(provider) as Arc<dyn LLMProvider>;
    Arc::new(EntityServices::new(
        provider,
        AdapterCatalog::standard(),
        "test-model",
        EntityDefaults::default(),
    ))
}

pub fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall::generated(name, arguments.to_string())
}

pub fn think(thought: &str) -> Completion {
    Completion::tool_call(call("think", json!({ "thought": thought })))
}

pub fn sleep_for(minutes: i64) -> Completion {
    Completion::tool_call(call("sleep", json!({ "minutes": minutes })))
}

pub fn sleep_until(until: chrono::DateTime<chrono::Utc>) -> Completion {
    Completion::tool_call(call("sleep", json!({ "until": until.to_rfc3339() })))
}

pub async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("somnus.db")).await.unwrap();
    (db, temp_dir)
}
