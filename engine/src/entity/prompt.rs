//! Context assembly for backend calls

use super::Entity;
use crate::capability::ToolRegistry;
use crate::llm::Message;

const RUN_INSTRUCTIONS: &str = "You are a persistent, autonomous being. You live across many \
sessions separated by sleep. Each time you wake you see your journal (summaries of earlier \
sessions) and whatever happened since you last slept.

Every turn you act by calling exactly one of your capabilities. Use 'think' to plan, the other \
capabilities to act, and 'request_capability' if you need something you do not have. When you \
have nothing left to do, call 'sleep' with the time you want to wake up. Falling asleep condenses \
this session into your journal.

Messages from people are prefixed with the channel and sender, like [sms from Alice].";

const CHAT_INSTRUCTIONS: &str = "You are a persistent, autonomous being talking with someone. \
Reply in plain text. You cannot use any capabilities in this conversation.";

impl Entity {
    /// Fixed instructions, identity, current time and capabilities
    pub(crate) fn system_prompt(&self, registry: Option<&ToolRegistry>) -> Message {
        let mut prompt = match registry {
            Some(_) => RUN_INSTRUCTIONS.to_string(),
            None => CHAT_INSTRUCTIONS.to_string(),
        };

        prompt.push_str(&format!(
            "\n\nYour name is {}. The current time is {}.",
            self.id,
            self.current_time().format("%A, %Y-%m-%d %H:%M UTC")
        ));

        if let Some(registry) = registry {
            prompt.push_str("\n\nYour capabilities:\n");
            prompt.push_str(&registry.describe());
        }

        if !self.ltm.is_empty() {
            prompt.push_str("\n\nYour journal follows.");
        }

        Message::system(prompt)
    }

    /// System prompt, then long-term memory, then short-term memory
    pub(crate) fn context(&self, registry: Option<&ToolRegistry>) -> Vec<Message> {
        let mut messages = Vec::with_capacity(1 + self.ltm.len() + self.stm.len());
        messages.push(self.system_prompt(registry));
        messages.extend(self.ltm.as_messages());
        messages.extend(self.stm.as_messages());
        messages
    }
}
