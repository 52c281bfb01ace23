//! Installable adapters
//!
//! The catalog is the set of adapters an administrator can enable on an
//! entity by name. Adapters for external systems (calendars, contacts, SMS)
//! plug in through `AdapterCatalog::register`; the two shipped here only read
//! the entity's own state.

use async_trait::async_trait;
use sdk::{ParamType, ParameterSchema, ToolInput};
use std::sync::Arc;

use super::{Adapter, Tool, ToolOutcome};
use crate::entity::Entity;

const DEFAULT_RECALL_LIMIT: i64 = 5;

#[derive(Clone)]
pub struct AdapterCatalog {
    adapters: Vec<Arc<dyn Adapter>>,
}

impl AdapterCatalog {
    pub fn empty() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }

    /// Catalog with the built-in `clock` and `journal` adapters
    pub fn standard() -> Self {
        let mut catalog = Self::empty();
        catalog.register(Arc::new(ClockAdapter));
        catalog.register(Arc::new(JournalAdapter));
        catalog
    }

    /// Install an adapter. A later adapter with an existing name replaces it.
    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        self.adapters.retain(|a| a.name() != adapter.name());
        self.adapters.push(adapter);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Adapter>> {
        self.adapters.iter().find(|a| a.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Adapter>> {
        self.adapters.iter()
    }
}

impl Default for AdapterCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

/// Access to the entity's (simulated) clock
pub struct ClockAdapter;

impl Adapter for ClockAdapter {
    fn name(&self) -> &str {
        "clock"
    }

    fn description(&self) -> &str {
        "Read the current date and time"
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        vec![Arc::new(CurrentTimeTool)]
    }
}

struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::empty()
    }

    async fn execute(&self, entity: &Entity, _input: ToolInput) -> ToolOutcome {
        let now = entity.current_time();
        ToolOutcome::text(format!(
            "It is {} ({}).",
            now.format("%A, %B %-d %Y, %H:%M UTC"),
            now.to_rfc3339()
        ))
    }
}

/// Read access to the entity's long-term memory
pub struct JournalAdapter;

impl Adapter for JournalAdapter {
    fn name(&self) -> &str {
        "journal"
    }

    fn description(&self) -> &str {
        "Look back through your journal of past sessions"
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        vec![Arc::new(RecallTool)]
    }
}

struct RecallTool;

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &str {
        "recall"
    }

    fn description(&self) -> &str {
        "List your most recent journal entries, newest last."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::empty().optional(
            "limit",
            ParamType::Integer,
            "How many entries to return (default 5)",
        )
    }

    async fn execute(&self, entity: &Entity, input: ToolInput) -> ToolOutcome {
        let limit = input.param_i64_opt("limit").unwrap_or(DEFAULT_RECALL_LIMIT);
        if limit <= 0 {
            return ToolOutcome::error("limit must be positive");
        }

        let entries = entity.ltm().entries();
        if entries.is_empty() {
            return ToolOutcome::text("Your journal is empty.");
        }

        let skip = entries.len().saturating_sub(limit as usize);
        let lines: Vec<String> = entries[skip..]
            .iter()
            .map(|e| format!("[{}] {}", e.timestamp.format("%Y-%m-%d %H:%M"), e.message))
            .collect();
        ToolOutcome::text(lines.join("\n"))
    }
}
