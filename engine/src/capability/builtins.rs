//! Built-in capabilities every entity has regardless of enabled adapters

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use sdk::errors::EngineError;
use sdk::{ParamType, ParameterSchema, ToolInput};
use std::sync::Arc;
use tracing::{debug, info};

use super::{Effect, Tool, ToolOutcome};
use crate::entity::Entity;

pub fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(SleepTool),
        Arc::new(RequestCapabilityTool),
        Arc::new(ThinkTool),
    ]
}

/// Ends the run: consolidates memory, then goes dormant
pub struct SleepTool;

/// Consolidation followed by the wake-state transition
struct SleepEffect {
    until: DateTime<Utc>,
}

#[async_trait]
impl Effect for SleepEffect {
    async fn apply(self: Box<Self>, entity: &mut Entity) -> Result<(), EngineError> {
        entity.consolidate().await?;
        entity.set_sleep_until(Some(self.until));
        Ok(())
    }
}

/// Accepts RFC 3339, or a bare `YYYY-MM-DDTHH:MM[:SS]` taken as UTC
fn parse_until(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(format!(
        "could not parse '{}' as a timestamp, use RFC 3339 like 2030-01-01T08:00:00Z",
        raw
    ))
}

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Go to sleep until a given time. Your memories of this session are condensed into your \
         journal and the session ends. Give either 'until' or 'minutes'."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::empty()
            .optional(
                "until",
                ParamType::String,
                "When to wake up, as an RFC 3339 timestamp",
            )
            .optional("minutes", ParamType::Integer, "How many minutes to sleep")
    }

    async fn execute(&self, entity: &Entity, input: ToolInput) -> ToolOutcome {
        let until = if let Some(raw) = input.param_str_opt("until") {
            match parse_until(&raw) {
                Ok(t) => t,
                Err(e) => return ToolOutcome::error(e),
            }
        } else if let Some(minutes) = input.param_i64_opt("minutes") {
            if minutes <= 0 {
                return ToolOutcome::error("minutes must be positive");
            }
            match Duration::try_minutes(minutes)
                .and_then(|d| entity.current_time().checked_add_signed(d))
            {
                Some(t) => t,
                None => return ToolOutcome::error("minutes out of range"),
            }
        } else {
            return ToolOutcome::error(
                "sleep needs either 'until' (RFC 3339 timestamp) or 'minutes'",
            );
        };

        ToolOutcome::with_effect(
            format!("Going to sleep until {}.", until.to_rfc3339()),
            SleepEffect { until },
        )
    }
}

/// Escalation signal: the entity asks for a capability it does not have
pub struct RequestCapabilityTool;

#[async_trait]
impl Tool for RequestCapabilityTool {
    fn name(&self) -> &str {
        "request_capability"
    }

    fn description(&self) -> &str {
        "Ask an administrator for a capability you do not have yet, explaining why you need it."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::empty()
            .required("name", ParamType::String, "Short name of the capability")
            .required("reason", ParamType::String, "Why you need it")
    }

    async fn execute(&self, entity: &Entity, input: ToolInput) -> ToolOutcome {
        let name = match input.param_str("name") {
            Ok(name) => name,
            Err(e) => return ToolOutcome::error(e),
        };
        let reason = input.param_str_opt("reason").unwrap_or_default();

        info!(entity = %entity.id(), capability = %name, reason = %reason, "Capability requested");

        ToolOutcome::text(format!(
            "Your request for the '{}' capability has been noted. It is not available yet.",
            name
        ))
    }
}

/// Lets the model record planning rationale as its action for the turn
pub struct ThinkTool;

#[async_trait]
impl Tool for ThinkTool {
    fn name(&self) -> &str {
        "think"
    }

    fn description(&self) -> &str {
        "Write down your reasoning or plan without taking any other action."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::empty().required("thought", ParamType::String, "Your thought")
    }

    async fn execute(&self, entity: &Entity, input: ToolInput) -> ToolOutcome {
        match input.param_str("thought") {
            Ok(thought) => {
                debug!(entity = %entity.id(), "Thought: {}", thought);
                ToolOutcome::text("Noted.")
            }
            Err(e) => ToolOutcome::error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_until_rfc3339_with_offset() {
        let t = parse_until("2030-01-01T10:00:00+02:00").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2030, 1, 1, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_until_naive_is_utc() {
        let t = parse_until("2030-01-01T08:30").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2030, 1, 1, 8, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_until_rejects_garbage() {
        let err = parse_until("tomorrow morning").unwrap_err();
        assert!(err.contains("tomorrow morning"));
    }

    #[test]
    fn test_sleep_schema_fields_are_optional() {
        let schema = SleepTool.parameters().to_json_schema();
        assert_eq!(schema["required"].as_array().unwrap().len(), 0);
        assert!(schema["properties"]["until"].is_object());
        assert!(schema["properties"]["minutes"].is_object());
    }
}
