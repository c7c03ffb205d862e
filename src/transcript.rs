//! Display projection of a running conversation.
//!
//! A [`Transcript`] folds [`AgentEvent`]s into entries a chat view can render
//! directly. It is derived and lossy: tool payloads are truncated, and text
//! is shown as it streamed rather than as finally recorded. It must never be
//! used to build requests; [`crate::Conversation`] is the source of truth.

use crate::events::AgentEvent;
use crate::types::ContentBlock;
use crate::value::input_to_json;

/// Default display limit for tool inputs and results, in characters.
pub const DEFAULT_MAX_PAYLOAD_CHARS: usize = 2000;

/// One rendered line of the chat view.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEntry {
    User {
        text: String,
    },
    Assistant {
        text: String,
    },
    Thinking {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        /// Input as a JSON string; empty until the block is finalized.
        input: String,
        server: bool,
    },
    ToolResult {
        tool_use_id: String,
        name: String,
        content: String,
        is_error: bool,
    },
    /// Results delivered by the remote service for a server tool.
    ServerToolResult {
        tool_use_id: String,
        entries: usize,
        is_error: bool,
    },
    Error {
        message: String,
    },
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Streaming {
    Text,
    Thinking,
}

/// Append-only list of display entries.
#[derive(Debug, Clone)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    max_payload_chars: usize,
    streaming: Option<Streaming>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            max_payload_chars: DEFAULT_MAX_PAYLOAD_CHARS,
            streaming: None,
        }
    }

    pub fn with_max_payload_chars(mut self, max: usize) -> Self {
        self.max_payload_chars = max;
        self
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.streaming = None;
    }

    /// Folds one event into the transcript.
    pub fn apply(&mut self, event: &AgentEvent) {
        match event {
            AgentEvent::UserMessage { text } => {
                self.streaming = None;
                self.entries.push(TranscriptEntry::User { text: text.clone() });
            }
            AgentEvent::TurnStarted { .. } | AgentEvent::TurnEnded { .. } => {
                self.streaming = None;
            }
            AgentEvent::TextDelta { text } => self.append(Streaming::Text, text),
            AgentEvent::ThinkingDelta { text } => self.append(Streaming::Thinking, text),
            AgentEvent::ToolUseStarted { id, name, server } => {
                self.streaming = None;
                self.entries.push(TranscriptEntry::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: String::new(),
                    server: *server,
                });
            }
            AgentEvent::BlockFinalized { block } => {
                self.streaming = None;
                self.finalize(block);
            }
            AgentEvent::ToolResult {
                tool_use_id,
                name,
                content,
                is_error,
            } => {
                self.streaming = None;
                self.entries.push(TranscriptEntry::ToolResult {
                    tool_use_id: tool_use_id.clone(),
                    name: name.clone(),
                    content: truncate(content, self.max_payload_chars),
                    is_error: *is_error,
                });
            }
            AgentEvent::Error { message } => {
                self.streaming = None;
                self.entries.push(TranscriptEntry::Error {
                    message: message.clone(),
                });
            }
            AgentEvent::Cancelled => {
                self.streaming = None;
                self.entries.push(TranscriptEntry::Cancelled);
            }
        }
    }

    fn append(&mut self, kind: Streaming, fragment: &str) {
        if self.streaming == Some(kind) {
            match self.entries.last_mut() {
                Some(TranscriptEntry::Assistant { text }) | Some(TranscriptEntry::Thinking { text }) => {
                    text.push_str(fragment);
                    return;
                }
                _ => {}
            }
        }

        self.streaming = Some(kind);
        let text = fragment.to_string();
        self.entries.push(match kind {
            Streaming::Text => TranscriptEntry::Assistant { text },
            Streaming::Thinking => TranscriptEntry::Thinking { text },
        });
    }

    fn finalize(&mut self, block: &ContentBlock) {
        match block {
            ContentBlock::ToolUse(tool_use) | ContentBlock::ServerToolUse(tool_use) => {
                let rendered = truncate(
                    &input_to_json(&tool_use.input).to_string(),
                    self.max_payload_chars,
                );
                let entry = self.entries.iter_mut().rev().find_map(|entry| match entry {
                    TranscriptEntry::ToolUse { id, input, .. } if *id == tool_use.id => Some(input),
                    _ => None,
                });
                match entry {
                    Some(input) => *input = rendered,
                    None => self.entries.push(TranscriptEntry::ToolUse {
                        id: tool_use.id.clone(),
                        name: tool_use.name.clone(),
                        input: rendered,
                        server: matches!(block, ContentBlock::ServerToolUse(_)),
                    }),
                }
            }
            ContentBlock::ServerToolResult(result) => {
                self.entries.push(TranscriptEntry::ServerToolResult {
                    tool_use_id: result.tool_use_id.clone(),
                    entries: result.entries().len(),
                    is_error: result.is_error(),
                });
            }
            // Already shown through their deltas.
            ContentBlock::Text(_) | ContentBlock::Thinking(_) | ContentBlock::ToolResult(_) => {}
        }
    }
}

/// Cuts `text` to `max` characters, noting how much was dropped.
fn truncate(text: &str, max: usize) -> String {
    let total = text.chars().count();
    if total <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max).collect();
    format!("{}... ({} more chars)", kept, total - max)
}
