//! Context management utilities for manual history management
//!
//! These are opt-in helpers; the session never truncates on its own. You
//! decide when a history is too long and start a new session over the
//! truncated messages.
//!
//! # Features
//!
//! - Token estimation (character-based approximation)
//! - Truncation that never separates a tool use from its result
//!
//! # Examples
//!
//! ```rust
//! use modelwar_agent::{Message, estimate_tokens, truncate_messages};
//!
//! let messages = vec![Message::user("Write me an imp")];
//! let tokens = estimate_tokens(&messages);
//!
//! if tokens > 150_000 {
//!     let truncated = truncate_messages(&messages, 20);
//!     // Start a new session with `truncated`...
//! }
//! ```

use crate::types::{ContentBlock, Message, MessageContent, MessageRole, ServerToolContent};
use crate::value::input_to_json;

/// Estimate token count for message list
///
/// Uses character-based approximation (1 token ≈ 4 characters).
///
/// # Note
///
/// This is an APPROXIMATION; real tokenizers differ per model. Keep a 10-20%
/// safety margin when checking limits. Thinking signatures are opaque and
/// not counted.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    if messages.is_empty() {
        return 0;
    }

    let mut total_chars = 0;

    for message in messages {
        // ~2 tokens for role formatting
        total_chars += 8;

        match &message.content {
            MessageContent::Text(text) => total_chars += text.len(),
            MessageContent::Blocks(blocks) => {
                for block in blocks {
                    total_chars += block_chars(block);
                }
            }
        }
    }

    // Conversation-level overhead
    total_chars += 16;

    total_chars.div_ceil(4)
}

fn block_chars(block: &ContentBlock) -> usize {
    match block {
        ContentBlock::Text(text) => text.text.len(),
        ContentBlock::Thinking(thinking) => thinking.thinking.len(),
        ContentBlock::ToolUse(tool) | ContentBlock::ServerToolUse(tool) => {
            tool.name.len() + tool.id.len() + input_to_json(&tool.input).to_string().len()
        }
        ContentBlock::ToolResult(result) => result.tool_use_id.len() + result.content.len(),
        ContentBlock::ServerToolResult(result) => {
            let payload = match &result.content {
                ServerToolContent::Entries(entries) => entries
                    .iter()
                    .map(|e| e.to_json().to_string().len())
                    .sum::<usize>(),
                ServerToolContent::Error(error) => error.to_json().to_string().len(),
            };
            result.tool_use_id.len() + payload
        }
    }
}

/// Truncate message history, keeping recent messages
///
/// Keeps at least the last `keep` messages. The cut is moved back to the
/// nearest user *text* message so the kept history never starts with a tool
/// result whose tool use was dropped. If no such message exists, nothing is
/// dropped.
///
/// Returns a new Vec; the original is unchanged.
///
/// Warning: truncating removes context the model may need. Use at natural
/// breakpoints.
pub fn truncate_messages(messages: &[Message], keep: usize) -> Vec<Message> {
    if messages.len() <= keep {
        return messages.to_vec();
    }

    let earliest = messages.len() - keep;
    let cut = (0..=earliest)
        .rev()
        .find(|&i| is_safe_cut(&messages[i]))
        .unwrap_or(0);

    messages[cut..].to_vec()
}

fn is_safe_cut(message: &Message) -> bool {
    message.role == MessageRole::User && matches!(message.content, MessageContent::Text(_))
}

/// Check if history is approaching a token limit
///
/// `margin` is a fraction of `limit` (e.g. 0.9 for 90%).
pub fn is_approaching_limit(messages: &[Message], limit: usize, margin: f32) -> bool {
    let estimated = estimate_tokens(messages);
    let threshold = (limit as f32 * margin) as usize;
    estimated > threshold
}
