//! Two-tier entity memory
//!
//! A `Memory<T>` is an append-ordered, time-indexed log. Short-term memory
//! holds structured chat messages (`Memory<Message>`); long-term memory holds
//! free-text journal summaries (`Memory<String>`).
//!
//! Entries carry a per-store sequence number next to their timestamp, so two
//! writes inside the same clock tick are both kept and keep their order.
//! Timestamps are clamped to be non-decreasing: after a negative time shift a
//! new entry is stamped with the newest existing timestamp instead of sorting
//! before it.

use chrono::{DateTime, Duration, Utc};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tracing::{debug, info};

use crate::llm::{LLMProvider, Message, MessageRole};

const SUMMARY_INSTRUCTIONS: &str = "You are about to fall asleep. Write a first-person journal \
entry summarizing what happened while you were awake: who you talked to, what you learned, what \
you did and anything you intend to follow up on. Be concise. Reply with the journal entry only.";

/// One stored message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryEntry<T> {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub seq: u64,
    pub message: T,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Memory<T> {
    entries: Vec<MemoryEntry<T>>,
    time_offset: i64,
    next_seq: u64,
}

impl<T> Default for Memory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Memory<T> {
    pub fn new() -> Self {
        Self::with_offset(0)
    }

    /// Empty store whose clock runs `time_offset` minutes ahead of real time
    pub fn with_offset(time_offset: i64) -> Self {
        Self {
            entries: Vec::new(),
            time_offset,
            next_seq: 0,
        }
    }

    /// Rebuild a store from persisted entries.
    ///
    /// Entries are re-sorted by `(timestamp, seq)` so a hand-edited export
    /// cannot break ordering.
    pub fn from_entries(mut entries: Vec<MemoryEntry<T>>, time_offset: i64) -> Self {
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.seq.cmp(&b.seq)));
        let next_seq = entries.iter().map(|e| e.seq + 1).max().unwrap_or(0);
        Self {
            entries,
            time_offset,
            next_seq,
        }
    }

    /// The store's notion of "now": real time plus the offset
    pub fn current_time(&self) -> DateTime<Utc> {
        Utc::now() + Duration::minutes(self.time_offset)
    }

    pub fn time_offset(&self) -> i64 {
        self.time_offset
    }

    /// Move the store's clock; existing timestamps are left untouched
    pub fn shift_time(&mut self, minutes: i64) {
        self.time_offset += minutes;
    }

    /// Append `message` stamped with the current simulated time
    pub fn add(&mut self, message: T) -> &MemoryEntry<T> {
        let mut timestamp = self.current_time();
        if let Some(last) = self.entries.last() {
            if last.timestamp > timestamp {
                timestamp = last.timestamp;
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(MemoryEntry {
            timestamp,
            seq,
            message,
        });

        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[MemoryEntry<T>] {
        &self.entries
    }

    /// Messages in timestamp order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|e| &e.message)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain all entries. The sequence counter keeps counting.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: Clone> Memory<T> {
    /// Owned copy of the entries, for persistence
    pub fn to_entries(&self) -> Vec<MemoryEntry<T>> {
        self.entries.clone()
    }
}

impl Memory<Message> {
    /// Short-term memory as chat input
    pub fn as_messages(&self) -> Vec<Message> {
        self.iter().cloned().collect()
    }

    /// Render the log as a timestamped transcript
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let msg = &entry.message;
            let stamp = entry.timestamp.format("%Y-%m-%d %H:%M:%S");
            let _ = match msg.role {
                MessageRole::Assistant if !msg.tool_calls.is_empty() => {
                    let calls: Vec<String> = msg
                        .tool_calls
                        .iter()
                        .map(|tc| format!("{}({})", tc.name, tc.arguments))
                        .collect();
                    if msg.content.trim().is_empty() {
                        writeln!(out, "[{}] you called {}", stamp, calls.join(", "))
                    } else {
                        writeln!(
                            out,
                            "[{}] you: {} (called {})",
                            stamp,
                            msg.content.trim(),
                            calls.join(", ")
                        )
                    }
                }
                MessageRole::Assistant => writeln!(out, "[{}] you: {}", stamp, msg.content.trim()),
                MessageRole::Tool => writeln!(out, "[{}] result: {}", stamp, msg.content.trim()),
                MessageRole::System => writeln!(out, "[{}] system: {}", stamp, msg.content.trim()),
                MessageRole::User => writeln!(out, "[{}] {}", stamp, msg.rendered_content().trim()),
            };
        }
        out
    }

    /// Summarize the log into one journal entry.
    ///
    /// An empty store yields an empty summary without calling the backend.
    /// The store is not cleared; the caller appends the summary to long-term
    /// memory and clears this store as one step.
    pub async fn enshrine(
        &self,
        provider: &dyn LLMProvider,
        model: &str,
    ) -> Result<String, EngineError> {
        if self.is_empty() {
            debug!("Short-term memory empty, nothing to enshrine");
            return Ok(String::new());
        }

        let prompt = format!(
            "The current time is {}.\n\nHere is everything that happened since you last slept:\n\n{}",
            self.current_time().to_rfc3339(),
            self.transcript()
        );
        let messages = vec![Message::system(SUMMARY_INSTRUCTIONS), Message::user(prompt)];

        let completion = provider
            .complete(model, &messages, None, false)
            .await
            .map_err(|e| EngineError::BackendUnavailable(e.to_string()))?;

        let summary = completion
            .text_content()
            .ok_or(EngineError::EmptySummary)?
            .to_string();

        info!(
            entries = self.len(),
            summary_len = summary.len(),
            "Enshrined short-term memory"
        );
        Ok(summary)
    }
}

impl Memory<String> {
    /// Long-term memory as chat input: one system message per journal entry
    pub fn as_messages(&self) -> Vec<Message> {
        self.entries
            .iter()
            .map(|e| {
                Message::system(format!(
                    "Journal entry from {}: {}",
                    e.timestamp.format("%Y-%m-%d %H:%M"),
                    e.message
                ))
            })
            .collect()
    }
}
