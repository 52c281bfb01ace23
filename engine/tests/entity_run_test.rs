/// Integration tests for the entity run loop
///
/// Drives whole runs against a scripted backend:
/// - sleep ends the run, consolidates and sets the wake time
/// - the turn budget bounds a run that never sleeps
/// - dormant entities do not call the backend
/// - unknown tools, extra tool calls and malformed arguments
/// - backend failures during a turn and during consolidation
mod common;

use chrono::{DateTime, Duration, Utc};
use common::{call, services_with, sleep_for, sleep_until, think, ScriptedProvider};
use sdk::errors::EngineError;
use serde_json::json;
use somnus_engine::entity::{ChatOptions, EntityOptions, WakeOutcome};
use somnus_engine::llm::{Completion, LLMError, MessageRole};
use std::sync::Arc;

fn options(max_messages: u32) -> EntityOptions {
    EntityOptions {
        max_messages: Some(max_messages),
        ..Default::default()
    }
}

fn whole_seconds(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp(), 0).unwrap()
}

#[tokio::test]
async fn test_sleep_ends_run_and_consolidates() {
    let provider = Arc::new(ScriptedProvider::new());
    let until = whole_seconds(Utc::now() + Duration::minutes(60));
    provider
        .push(sleep_until(until))
        .push(Completion::text("Woke up briefly and went back to sleep."));

    let services = services_with(&provider);
    let mut entity = services.create("ada", options(5)).unwrap();

    let summary = entity.run().await.unwrap();

    assert_eq!(summary.turns, 1);
    assert_eq!(summary.tools_executed, 1);
    assert_eq!(summary.slept_until, Some(until));
    assert_eq!(entity.sleep_until(), Some(until));
    assert!(entity.is_dormant());
    assert!(entity.stm().is_empty());
    assert_eq!(entity.ltm().len(), 1);
    assert_eq!(
        entity.ltm().iter().next().unwrap(),
        "Woke up briefly and went back to sleep."
    );

    // One forced turn plus the tool-free summary request
    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].force_tool_use);
    assert!(requests[1].tool_names.is_none());
    assert!(!requests[1].force_tool_use);
}

#[tokio::test]
async fn test_turn_budget_bounds_run_without_sleep() {
    let provider = Arc::new(ScriptedProvider::new());
    provider
        .push(think("first"))
        .push(think("second"))
        .push(think("third"))
        .push(sleep_for(10));

    let services = services_with(&provider);
    let mut entity = services.create("ada", options(3)).unwrap();

    let summary = entity.run().await.unwrap();

    assert_eq!(summary.turns, 3);
    assert_eq!(summary.tools_executed, 3);
    assert!(summary.slept_until.is_none());
    assert!(entity.sleep_until().is_none());
    assert_eq!(provider.call_count(), 3);

    // Wake message, then an assistant message and a tool result per turn
    assert_eq!(entity.stm().len(), 7);
    assert!(entity.ltm().is_empty());
}

#[tokio::test]
async fn test_turns_without_tool_calls_still_count() {
    let provider = Arc::new(ScriptedProvider::new());
    let services = services_with(&provider);
    let mut entity = services.create("ada", options(2)).unwrap();

    let summary = entity.run().await.unwrap();

    assert_eq!(summary.turns, 2);
    assert_eq!(summary.tools_executed, 0);
    assert_eq!(entity.stm().len(), 3);
}

#[tokio::test]
async fn test_run_offers_builtins_and_enabled_adapters() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push(sleep_for(5));

    let services = services_with(&provider);
    let mut entity = services
        .create(
            "ada",
            EntityOptions {
                adapters: Some(vec!["clock".to_string()]),
                ..Default::default()
            },
        )
        .unwrap();
    entity.run().await.unwrap();

    let first = &provider.requests()[0];
    let names = first.tool_names.clone().unwrap();
    assert_eq!(names, vec!["sleep", "request_capability", "think", "current_time"]);

    assert_eq!(first.messages[0].role, MessageRole::System);
    assert!(first.messages[0].content.contains("Your name is ada"));
    let wake = first.messages.last().unwrap();
    assert!(wake.content.starts_with("You are waking up."));
}

#[tokio::test]
async fn test_dormant_entity_does_not_call_backend() {
    let provider = Arc::new(ScriptedProvider::new());
    let services = services_with(&provider);
    let mut entity = services.create("ada", options(5)).unwrap();
    entity.set_sleep_until(Some(Utc::now() + Duration::hours(1)));

    match entity.check_wakeup().await.unwrap() {
        WakeOutcome::Dormant { remaining } => {
            assert!(remaining > Duration::minutes(58));
            assert!(remaining <= Duration::hours(1));
        }
        other => panic!("expected dormant, got {:?}", other),
    }

    assert_eq!(provider.call_count(), 0);
    assert!(entity.stm().is_empty());
    assert!(entity.is_dormant());
}

#[tokio::test]
async fn test_due_entity_runs_on_check() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push(sleep_for(30));

    let services = services_with(&provider);
    let mut entity = services.create("ada", options(5)).unwrap();
    entity.set_sleep_until(Some(Utc::now() - Duration::minutes(1)));

    match entity.check_wakeup().await.unwrap() {
        WakeOutcome::Ran(summary) => assert_eq!(summary.turns, 1),
        other => panic!("expected a run, got {:?}", other),
    }
    assert!(entity.is_dormant());
}

#[tokio::test]
async fn test_shifted_clock_makes_entity_due() {
    let provider = Arc::new(ScriptedProvider::new());
    let services = services_with(&provider);
    let mut entity = services.create("ada", options(1)).unwrap();
    entity.set_sleep_until(Some(Utc::now() + Duration::minutes(60)));

    entity.shift_time(120);
    assert!(!entity.is_dormant());
    assert!(matches!(
        entity.check_wakeup().await.unwrap(),
        WakeOutcome::Ran(_)
    ));

    entity.set_sleep_until(Some(entity.current_time() + Duration::minutes(30)));
    entity.shift_time(-120);
    assert!(entity.is_dormant());
    assert_eq!(entity.time_offset(), 0);
}

#[tokio::test]
async fn test_sleep_minutes_follow_entity_clock() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push(sleep_for(30));

    let services = services_with(&provider);
    let mut entity = services.create("ada", options(5)).unwrap();
    entity.shift_time(24 * 60);

    let before = entity.current_time();
    let summary = entity.run().await.unwrap();
    let until = summary.slept_until.unwrap();

    assert!(until >= before + Duration::minutes(30));
    assert!(until < before + Duration::minutes(31));
}

#[tokio::test]
async fn test_sleep_minutes_out_of_range_become_error_result() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push(sleep_for(1_000_000_000_000));

    let services = services_with(&provider);
    let mut entity = services.create("ada", options(1)).unwrap();

    let summary = entity.run().await.unwrap();

    assert_eq!(summary.tools_executed, 1);
    assert!(summary.slept_until.is_none());
    assert!(!entity.is_dormant());
    let result = entity.stm().iter().last().unwrap();
    assert_eq!(result.role, MessageRole::Tool);
    assert_eq!(result.content, "ERROR: minutes out of range");
}

#[tokio::test]
async fn test_unknown_tool_is_skipped() {
    let provider = Arc::new(ScriptedProvider::new());
    provider
        .push(Completion::tool_call(call("teleport", json!({ "to": "mars" }))))
        .push(sleep_for(30));

    let services = services_with(&provider);
    let mut entity = services.create("ada", options(5)).unwrap();

    let summary = entity.run().await.unwrap();

    assert_eq!(summary.turns, 2);
    assert_eq!(summary.tools_executed, 1);
    assert!(entity.is_dormant());

    // The second turn saw the unknown call but no result for it
    let second = &provider.requests()[1];
    assert!(second
        .messages
        .iter()
        .any(|m| m.tool_calls.iter().any(|c| c.name == "teleport")));
    assert!(!second.messages.iter().any(|m| m.role == MessageRole::Tool));
}

#[tokio::test]
async fn test_only_first_tool_call_is_executed() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push(Completion {
        content: None,
        tool_calls: vec![
            call("think", json!({ "thought": "plan" })),
            call("sleep", json!({ "minutes": 10 })),
        ],
    });

    let services = services_with(&provider);
    let mut entity = services.create("ada", options(1)).unwrap();

    let summary = entity.run().await.unwrap();

    assert_eq!(summary.tools_executed, 1);
    assert!(summary.slept_until.is_none());

    let messages: Vec<_> = entity.stm().iter().collect();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].tool_calls.len(), 1);
    assert_eq!(messages[1].tool_calls[0].name, "think");
    assert_eq!(messages[2].role, MessageRole::Tool);
    assert_eq!(messages[2].content, "Noted.");
}

#[tokio::test]
async fn test_malformed_arguments_become_error_result() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push(Completion::tool_call(call("sleep", json!({}))));

    let services = services_with(&provider);
    let mut entity = services.create("ada", options(1)).unwrap();

    let summary = entity.run().await.unwrap();

    assert_eq!(summary.tools_executed, 1);
    assert!(!entity.is_dormant());
    let result = entity.stm().iter().last().unwrap();
    assert_eq!(result.role, MessageRole::Tool);
    assert!(result.content.starts_with("ERROR:"));
}

#[tokio::test]
async fn test_backend_failure_propagates_and_keeps_memory() {
    let provider = Arc::new(ScriptedProvider::new());
    provider
        .push(think("before the outage"))
        .push_error(LLMError::ProviderUnavailable("connection refused".to_string()));

    let services = services_with(&provider);
    let mut entity = services.create("ada", options(5)).unwrap();

    let err = entity.run().await.unwrap_err();

    assert!(matches!(err, EngineError::BackendUnavailable(_)));
    assert!(entity.sleep_until().is_none());
    // Wake message plus the first turn's call and result
    assert_eq!(entity.stm().len(), 3);
}

#[tokio::test]
async fn test_consolidation_failure_leaves_memory_untouched() {
    let provider = Arc::new(ScriptedProvider::new());
    provider
        .push(sleep_for(10))
        .push_error(LLMError::Timeout);

    let services = services_with(&provider);
    let mut entity = services.create("ada", options(5)).unwrap();

    let err = entity.run().await.unwrap_err();

    assert!(matches!(err, EngineError::BackendUnavailable(_)));
    assert!(entity.sleep_until().is_none());
    assert!(entity.ltm().is_empty());
    let last = entity.stm().iter().last().unwrap();
    assert!(last.content.starts_with("Going to sleep until"));
}

#[tokio::test]
async fn test_empty_summary_is_an_error() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push(sleep_for(10)).push(Completion::text("   "));

    let services = services_with(&provider);
    let mut entity = services.create("ada", options(5)).unwrap();

    let err = entity.run().await.unwrap_err();
    assert!(matches!(err, EngineError::EmptySummary));
    assert!(!entity.stm().is_empty());
}

#[tokio::test]
async fn test_consolidating_empty_memory_changes_nothing() {
    let provider = Arc::new(ScriptedProvider::new());
    let services = services_with(&provider);
    let mut entity = services.create("ada", options(5)).unwrap();

    entity.consolidate().await.unwrap();

    assert!(entity.stm().is_empty());
    assert_eq!(entity.ltm().len(), 0);
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn test_journal_is_in_next_run_context() {
    let provider = Arc::new(ScriptedProvider::new());
    provider
        .push(sleep_for(1))
        .push(Completion::text("Learned the garden needs water."))
        .push(think("water the garden"));

    let services = services_with(&provider);
    let mut entity = services.create("ada", options(1)).unwrap();

    entity.run().await.unwrap();
    entity.run().await.unwrap();

    let third = &provider.requests()[2];
    assert!(third
        .messages
        .iter()
        .any(|m| m.role == MessageRole::System
            && m.content.starts_with("Journal entry from")
            && m.content.contains("garden needs water")));
}

#[tokio::test]
async fn test_chat_is_tool_free() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push(Completion::text("  Hi Alice!  "));

    let services = services_with(&provider);
    let mut entity = services.create("ada", options(5)).unwrap();

    let reply = entity
        .chat(
            "hello",
            ChatOptions {
                channel: Some("sms".to_string()),
                sender: Some("Alice".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(reply, "Hi Alice!");

    let request = &provider.requests()[0];
    assert!(request.tool_names.is_none());
    assert!(!request.force_tool_use);

    let messages: Vec<_> = entity.stm().iter().collect();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].channel.as_deref(), Some("sms"));
    assert_eq!(messages[0].sender.as_deref(), Some("Alice"));
    assert_eq!(messages[0].rendered_content(), "[sms from Alice] hello");
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].content, "Hi Alice!");
}

#[tokio::test]
async fn test_chat_then_sleep_journals_the_conversation() {
    let provider = Arc::new(ScriptedProvider::new());
    provider
        .push(Completion::text("Sure, see you tomorrow."))
        .push(sleep_for(60))
        .push(Completion::text("Talked with Bob about tomorrow."));

    let services = services_with(&provider);
    let mut entity = services.create("ada", options(5)).unwrap();

    entity
        .chat(
            "meet tomorrow?",
            ChatOptions {
                channel: None,
                sender: Some("Bob".to_string()),
            },
        )
        .await
        .unwrap();
    entity.run().await.unwrap();

    // The summary request saw the chat as part of the transcript
    let summary_request = &provider.requests()[2];
    let prompt = &summary_request.messages[1].content;
    assert!(prompt.contains("meet tomorrow?"));
    assert!(entity.stm().is_empty());
    assert_eq!(entity.ltm().len(), 1);
}
