//! Capabilities: tools an entity may invoke
//!
//! A `Tool` is a named operation with a parameter schema. Tools come from two
//! places: the built-ins every entity has (`sleep`, `request_capability`,
//! `think`) and the adapters enabled on the entity. A `ToolRegistry` is the
//! union of both, rebuilt at the start of every run.
//!
//! Execution never fails from the run loop's point of view: a tool reports
//! problems as `ERROR: ...` text so the model can see them and adjust.

pub mod adapters;
pub mod builtins;

pub use adapters::{AdapterCatalog, ClockAdapter, JournalAdapter};
pub use builtins::{builtin_tools, RequestCapabilityTool, SleepTool, ThinkTool};

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::{ParameterSchema, ToolInput};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::entity::Entity;
use crate::llm::ToolSchema;

/// Side effect that runs after a tool's result is in short-term memory
#[async_trait]
pub trait Effect: Send {
    async fn apply(self: Box<Self>, entity: &mut Entity) -> Result<(), EngineError>;
}

/// What a tool execution produced
pub struct ToolOutcome {
    /// Recorded in short-term memory as the tool result
    pub text: String,

    /// Applied by the dispatcher strictly after `text` has been recorded
    pub effect: Option<Box<dyn Effect>>,
}

impl ToolOutcome {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            effect: None,
        }
    }

    pub fn with_effect(text: impl Into<String>, effect: impl Effect + 'static) -> Self {
        Self {
            text: text.into(),
            effect: Some(Box::new(effect)),
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::text(format!("ERROR: {}", message))
    }
}

impl std::fmt::Debug for ToolOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolOutcome")
            .field("text", &self.text)
            .field("has_effect", &self.effect.is_some())
            .finish()
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model selects the tool by
    fn name(&self) -> &str;

    /// Shown to the model when it chooses a tool
    fn description(&self) -> &str;

    fn parameters(&self) -> ParameterSchema;

    async fn execute(&self, entity: &Entity, input: ToolInput) -> ToolOutcome;

    /// Schema handed to the language-model backend
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters().to_json_schema(),
        }
    }
}

/// A named bundle of tools granting access to one external system
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn tools(&self) -> Vec<Arc<dyn Tool>>;
}

/// Ordered name-to-tool lookup for one run
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-ins followed by the tools of each enabled adapter, in order.
    ///
    /// Adapter names missing from the catalog are skipped with a warning.
    pub fn for_entity(catalog: &AdapterCatalog, enabled: &[String]) -> Self {
        let mut registry = Self::new();
        for tool in builtin_tools() {
            registry.register(tool);
        }
        for name in enabled {
            match catalog.get(name) {
                Some(adapter) => {
                    for tool in adapter.tools() {
                        registry.register(tool);
                    }
                }
                None => warn!("Enabled adapter '{}' is not installed, skipping", name),
            }
        }
        registry
    }

    /// Add a tool. Returns false (and keeps the existing one) on a duplicate name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> bool {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            warn!("Duplicate tool name '{}' ignored", name);
            return false;
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        true
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|t| t.schema()).collect()
    }

    /// One "- name: description" line per tool
    pub fn describe(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::ParamType;

    struct Echo(&'static str);

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "Echo the input back"
        }

        fn parameters(&self) -> ParameterSchema {
            ParameterSchema::empty().required("text", ParamType::String, "Text to echo")
        }

        async fn execute(&self, _entity: &Entity, input: ToolInput) -> ToolOutcome {
            match input.param_str("text") {
                Ok(text) => ToolOutcome::text(text),
                Err(e) => ToolOutcome::error(e),
            }
        }
    }

    #[test]
    fn test_builtins_come_first() {
        let registry = ToolRegistry::for_entity(&AdapterCatalog::standard(), &[]);
        assert_eq!(registry.names(), vec!["sleep", "request_capability", "think"]);
    }

    #[test]
    fn test_enabled_adapter_tools_are_appended() {
        let registry = ToolRegistry::for_entity(
            &AdapterCatalog::standard(),
            &["clock".to_string(), "journal".to_string()],
        );
        assert!(registry.contains("current_time"));
        assert!(registry.contains("recall"));
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn test_unknown_adapter_is_skipped() {
        let registry =
            ToolRegistry::for_entity(&AdapterCatalog::standard(), &["teleporter".to_string()]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_duplicate_name_keeps_first() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register(Arc::new(Echo("echo"))));
        assert!(!registry.register(Arc::new(Echo("echo"))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_schema_uses_parameter_json_schema() {
        let schema = Echo("echo").schema();
        assert_eq!(schema.name, "echo");
        assert_eq!(schema.parameters["type"], "object");
        assert_eq!(schema.parameters["required"][0], "text");
    }

    #[test]
    fn test_describe_lists_every_tool() {
        let registry = ToolRegistry::for_entity(&AdapterCatalog::standard(), &[]);
        let text = registry.describe();
        assert_eq!(text.lines().count(), 3);
        assert!(text.starts_with("- sleep: "));
    }

    #[test]
    fn test_error_outcome_prefix() {
        let outcome = ToolOutcome::error("boom");
        assert_eq!(outcome.text, "ERROR: boom");
        assert!(outcome.effect.is_none());
    }
}
