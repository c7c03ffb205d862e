//! Conversation store: the authoritative, append-only message log.
//!
//! This is what gets replayed to the remote model on every request. Only the
//! loop controller writes to it; display state lives elsewhere
//! ([`crate::transcript`]) and never feeds back into it.

use crate::types::{ContentBlock, Message, MessageRole, ToolResultBlock, ToolUseBlock};
use std::collections::HashSet;

/// Ordered message history of one conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopts an existing history as-is.
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn push_user_text(&mut self, text: impl Into<String>) {
        self.push(Message::user(text));
    }

    /// Records one finished assistant turn. Empty turns are not recorded.
    pub fn push_assistant(&mut self, blocks: Vec<ContentBlock>) -> bool {
        if blocks.is_empty() {
            return false;
        }
        self.push(Message::assistant(blocks));
        true
    }

    /// Records tool results as one user message. No-op when empty.
    pub fn push_tool_results(&mut self, results: Vec<ToolResultBlock>) -> bool {
        if results.is_empty() {
            return false;
        }
        let blocks = results.into_iter().map(ContentBlock::ToolResult).collect();
        self.push(Message::user_with_blocks(blocks));
        true
    }

    /// Index of the most recent assistant message.
    pub fn last_assistant_index(&self) -> Option<usize> {
        self.messages
            .iter()
            .rposition(|m| m.role == MessageRole::Assistant)
    }

    pub fn ends_with_user(&self) -> bool {
        self.messages
            .last()
            .is_some_and(|m| m.role == MessageRole::User)
    }

    /// Client-side tool uses of the last assistant message that have no
    /// result in any later message, in emission order.
    ///
    /// Server tool uses are never reported: the remote service resolves them.
    pub fn unanswered_tool_uses(&self) -> Vec<&ToolUseBlock> {
        let Some(index) = self.last_assistant_index() else {
            return Vec::new();
        };

        let answered: HashSet<&str> = self.messages[index + 1..]
            .iter()
            .flat_map(Message::tool_results)
            .map(|r| r.tool_use_id.as_str())
            .collect();

        self.messages[index]
            .tool_uses()
            .filter(|u| !answered.contains(u.id.as_str()))
            .collect()
    }

    /// Inserts a user message of tool results directly after message `index`.
    pub(crate) fn insert_tool_results(&mut self, index: usize, results: Vec<ToolResultBlock>) {
        if results.is_empty() {
            return;
        }
        let blocks = results.into_iter().map(ContentBlock::ToolResult).collect();
        let at = (index + 1).min(self.messages.len());
        self.messages.insert(at, Message::user_with_blocks(blocks));
    }

    /// Mutable access to the message right after the last assistant one,
    /// when it is a user message carrying blocks.
    pub(crate) fn result_message_after_last_assistant(&mut self) -> Option<&mut Message> {
        let index = self.last_assistant_index()?;
        self.messages
            .get_mut(index + 1)
            .filter(|m| m.role == MessageRole::User)
            .filter(|m| matches!(m.content, crate::types::MessageContent::Blocks(_)))
    }
}

impl From<Vec<Message>> for Conversation {
    fn from(messages: Vec<Message>) -> Self {
        Self::from_messages(messages)
    }
}
