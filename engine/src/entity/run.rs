//! The turn loop
//!
//! One turn is one backend request plus at most one tool execution. Only the
//! first tool call of a response is executed; the rest are dropped, and the
//! assistant message stored in memory lists only the executed call.

use sdk::errors::EngineError;
use sdk::ToolInput;
use tracing::{debug, info, warn};

use super::{ChatOptions, Entity, RunSummary, WakeOutcome};
use crate::capability::{ToolOutcome, ToolRegistry};
use crate::llm::{Completion, LLMError, Message, ToolCall};

fn backend_error(err: LLMError) -> EngineError {
    EngineError::BackendUnavailable(err.to_string())
}

impl Entity {
    /// Wake up and act until the entity decides to sleep or the turn budget
    /// runs out.
    ///
    /// The synthetic "waking up" message is ordinary short-term memory, so a
    /// sleep decision always has something to consolidate.
    pub async fn run(&mut self) -> Result<RunSummary, EngineError> {
        self.sleep_until = None;

        let registry = ToolRegistry::for_entity(&self.services.catalog, &self.adapters);
        let schemas = registry.schemas();

        let woke_at = self.current_time();
        self.stm.add(Message::system(format!(
            "You are waking up. It is {}.",
            woke_at.format("%A, %Y-%m-%d %H:%M UTC")
        )));

        info!(
            entity = %self.id,
            max_messages = self.max_messages,
            tools = registry.len(),
            "Run started"
        );

        let mut turns = 0;
        let mut tools_executed = 0;

        while turns < self.max_messages && self.sleep_until.is_none() {
            turns += 1;

            let context = self.context(Some(&registry));
            let completion = self
                .services
                .provider
                .complete(&self.model, &context, Some(schemas.as_slice()), true)
                .await
                .map_err(backend_error)?;

            let Completion {
                content,
                mut tool_calls,
            } = completion;

            if tool_calls.len() > 1 {
                debug!(
                    entity = %self.id,
                    dropped = tool_calls.len() - 1,
                    "Dropping extra tool calls, only the first is executed"
                );
                tool_calls.truncate(1);
            }
            let call = tool_calls.first().cloned();

            self.stm.add(
                Completion {
                    content,
                    tool_calls,
                }
                .into_message(),
            );

            match call {
                Some(call) => {
                    if self.dispatch(&registry, call).await? {
                        tools_executed += 1;
                    }
                }
                None => debug!(entity = %self.id, turn = turns, "Response had no tool call"),
            }
        }

        if self.sleep_until.is_none() {
            info!(entity = %self.id, turns, "Turn budget exhausted before sleep");
        } else {
            info!(
                entity = %self.id,
                turns,
                sleep_until = ?self.sleep_until,
                "Run ended with sleep"
            );
        }

        Ok(RunSummary {
            turns,
            tools_executed,
            slept_until: self.sleep_until,
        })
    }

    /// Execute one tool call.
    ///
    /// The result text is committed to short-term memory before any deferred
    /// effect runs. Returns false when the name did not resolve; such a turn
    /// records no tool result.
    async fn dispatch(&mut self, registry: &ToolRegistry, call: ToolCall) -> Result<bool, EngineError> {
        let Some(tool) = registry.get(&call.name) else {
            let err = EngineError::UnknownCapability(call.name.clone());
            warn!(entity = %self.id, "{}, skipping tool step", err);
            return Ok(false);
        };

        debug!(entity = %self.id, tool = %call.name, args = %call.arguments, "Dispatching tool");

        let outcome = match ToolInput::from_json(&call.arguments) {
            Ok(input) => tool.execute(self, input).await,
            Err(e) => ToolOutcome::error(e),
        };

        self.stm.add(Message::tool_result(outcome.text, call.id));

        if let Some(effect) = outcome.effect {
            effect.apply(self).await?;
        }

        Ok(true)
    }

    /// Summarize short-term memory into one journal entry and clear it.
    ///
    /// Nothing is written to long-term memory when short-term memory was
    /// empty. On failure both tiers are left untouched.
    pub async fn consolidate(&mut self) -> Result<(), EngineError> {
        let summary = self
            .stm
            .enshrine(self.services.provider.as_ref(), &self.model)
            .await?;

        if !summary.is_empty() {
            self.ltm.add(summary);
        }
        let consolidated = self.stm.len();
        self.stm.clear();

        info!(
            entity = %self.id,
            consolidated,
            journal_entries = self.ltm.len(),
            "Consolidated short-term memory"
        );
        Ok(())
    }

    /// Tool-free exchange: record the message, ask for one reply, record it.
    pub async fn chat(&mut self, text: &str, options: ChatOptions) -> Result<String, EngineError> {
        self.stm
            .add(Message::user(text).with_origin(options.channel, options.sender));

        let context = self.context(None);
        let completion = self
            .services
            .provider
            .complete(&self.model, &context, None, false)
            .await
            .map_err(backend_error)?;

        let reply = completion.text_content().unwrap_or_default().to_string();
        self.stm.add(Message::assistant(reply.clone()));

        debug!(entity = %self.id, reply_len = reply.len(), "Chat reply recorded");
        Ok(reply)
    }

    /// Run if due; otherwise report how long the entity will stay asleep.
    pub async fn check_wakeup(&mut self) -> Result<WakeOutcome, EngineError> {
        if let Some(remaining) = self.remaining_sleep() {
            debug!(
                entity = %self.id,
                remaining_minutes = remaining.num_minutes(),
                "Still asleep"
            );
            return Ok(WakeOutcome::Dormant { remaining });
        }

        self.run().await.map(WakeOutcome::Ran)
    }
}
