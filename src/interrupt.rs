//! Repair of histories left with unanswered tool uses.
//!
//! Every client-side tool use must be answered by exactly one tool result
//! before the next request, or the remote API rejects the history. A turn
//! cancelled between recording the assistant message and recording all of
//! its results breaks that rule; these functions restore it.

use crate::conversation::Conversation;
use crate::types::{ContentBlock, Message, ToolResultBlock};

/// Content of results synthesized for cancelled tool uses.
pub const CANCELLED_BY_USER: &str = "Cancelled by user";

/// Content of results synthesized for tool uses of a turn that stopped for a
/// reason other than `tool_use` (for example `max_tokens`).
pub const TURN_ENDED_BEFORE_TOOLS: &str = "Turn ended before tool execution";

/// Answers every unanswered tool use of the last assistant message with a
/// "Cancelled by user" error result.
///
/// Returns the number of results added. A no-op on a consistent history.
pub fn patch_interrupted(conversation: &mut Conversation) -> usize {
    resolve_unanswered(conversation, CANCELLED_BY_USER)
}

/// Answers every unanswered tool use of the last assistant message with an
/// error result carrying `reason`.
///
/// Missing results are appended to the user message that directly follows
/// the assistant message when one with blocks exists; otherwise a new user
/// message is inserted right after the assistant message, ahead of anything
/// recorded later. Existing results are left untouched and server tool
/// uses are never answered.
pub fn resolve_unanswered(conversation: &mut Conversation, reason: &str) -> usize {
    let missing: Vec<ToolResultBlock> = conversation
        .unanswered_tool_uses()
        .into_iter()
        .map(|tool_use| ToolResultBlock::error(tool_use.id.clone(), reason))
        .collect();

    if missing.is_empty() {
        return 0;
    }

    let count = missing.len();
    log::info!("Resolving {} unanswered tool use(s): {}", count, reason);

    let Some(index) = conversation.last_assistant_index() else {
        return 0;
    };
    match conversation.result_message_after_last_assistant() {
        Some(message) => append_results(message, missing),
        None => conversation.insert_tool_results(index, missing),
    }

    count
}

fn append_results(message: &mut Message, results: Vec<ToolResultBlock>) {
    if let crate::types::MessageContent::Blocks(blocks) = &mut message.content {
        blocks.extend(results.into_iter().map(ContentBlock::ToolResult));
    }
}
