//! Content block assembly from streamed events.
//!
//! A streamed turn arrives as a strictly sequential series of block events:
//!
//! ```text
//! content_block_start  {"content_block":{"type":"tool_use","id":"t1","name":"bash","input":{}}}
//! content_block_delta  {"delta":{"type":"input_json_delta","partial_json":"{\"cm"}}
//! content_block_delta  {"delta":{"type":"input_json_delta","partial_json":"d\":\"ls\"}"}}
//! content_block_stop
//! message_delta        {"delta":{"stop_reason":"tool_use"}}
//! message_stop
//! ```
//!
//! [`BlockAssembler`] keeps at most one block open, accumulates its deltas,
//! and freezes it into a [`ContentBlock`] on `content_block_stop`. Tool input
//! fragments are not valid JSON on their own; only the concatenation is
//! parsed, once, when the block stops.
//!
//! Each call to [`BlockAssembler::process`] returns the live notifications the
//! event produced (text appended, tool use started, block finalized). They
//! are for display only; the loop controller works from [`TurnOutput`].

use crate::events::AgentEvent;
use crate::sse::{EventKind, StreamEvent};
use crate::types::{
    ContentBlock, InvalidInputPolicy, ServerToolResultBlock, TextBlock, ThinkingBlock,
    ToolUseBlock,
};
use crate::value::{ToolInput, input_from_json};
use crate::{Error, Result};
use serde_json::Value;

/// Stop reason signalling that the model is waiting for tool results.
pub const STOP_REASON_TOOL_USE: &str = "tool_use";

/// A tool invocation finalized in this turn, awaiting a result.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingToolUse {
    pub id: String,
    pub name: String,
    pub input: ToolInput,
    /// Executed by the remote service; never dispatched locally.
    pub server: bool,
    /// Set when the input failed to parse and the policy rejects such calls.
    pub input_error: Option<String>,
}

/// Everything a finished turn produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutput {
    /// Finalized blocks in arrival order.
    pub blocks: Vec<ContentBlock>,
    /// Tool invocations in emission order.
    pub pending: Vec<PendingToolUse>,
    pub stop_reason: Option<String>,
    /// Whether `message_stop` was seen.
    pub completed: bool,
}

impl TurnOutput {
    /// True when the model stopped to wait for tool results.
    pub fn wants_tool_results(&self) -> bool {
        self.stop_reason.as_deref() == Some(STOP_REASON_TOOL_USE)
    }
}

#[derive(Debug)]
enum OpenBlock {
    Text(String),
    Thinking {
        thinking: String,
        signature: String,
    },
    ToolUse {
        id: String,
        name: String,
        initial: ToolInput,
        json: String,
        server: bool,
    },
    ServerResult(ServerToolResultBlock),
}

/// Per-turn state machine turning events into content blocks.
#[derive(Debug)]
pub struct BlockAssembler {
    policy: InvalidInputPolicy,
    server_tool: Option<String>,
    open: Option<OpenBlock>,
    output: TurnOutput,
}

impl Default for BlockAssembler {
    fn default() -> Self {
        Self::new(InvalidInputPolicy::default())
    }
}

impl BlockAssembler {
    pub fn new(policy: InvalidInputPolicy) -> Self {
        Self {
            policy,
            server_tool: None,
            open: None,
            output: TurnOutput::default(),
        }
    }

    /// Reserved name of the declared server tool.
    ///
    /// Invocations of it are tagged server-side even when they arrive as a
    /// plain `tool_use` block, so they are never dispatched locally.
    pub fn with_server_tool(mut self, name: impl Into<String>) -> Self {
        self.server_tool = Some(name.into());
        self
    }

    /// Blocks finalized so far.
    pub fn blocks(&self) -> &[ContentBlock] {
        &self.output.blocks
    }

    /// Applies one event, returning the notifications it produced.
    ///
    /// # Errors
    ///
    /// An in-stream `error` event (e.g. `overloaded_error`) is terminal for
    /// the turn and returned as [`Error::Stream`].
    pub fn process(&mut self, event: StreamEvent) -> Result<Vec<AgentEvent>> {
        let payload = &event.payload;
        let notifications = match event.kind {
            EventKind::BlockStart => self.start_block(payload),
            EventKind::BlockDelta => self.apply_delta(payload),
            EventKind::BlockStop => self.stop_block(),
            EventKind::MessageDelta => {
                if let Some(reason) = payload["delta"]["stop_reason"].as_str() {
                    self.output.stop_reason = Some(reason.to_string());
                }
                Vec::new()
            }
            EventKind::MessageStop => {
                self.output.completed = true;
                Vec::new()
            }
            EventKind::MessageStart | EventKind::Heartbeat => Vec::new(),
            EventKind::Error => {
                let kind = payload["error"]["type"].as_str().unwrap_or("error");
                let message = payload["error"]["message"]
                    .as_str()
                    .unwrap_or("stream reported an error");
                return Err(Error::stream(format!("{}: {}", kind, message)));
            }
        };
        Ok(notifications)
    }

    /// Ends the turn. A block still open here never stopped and is discarded.
    pub fn finish(mut self) -> TurnOutput {
        if let Some(open) = self.open.take() {
            log::warn!("Discarding unfinished {} block at end of stream", kind_of(&open));
        }
        self.output
    }

    fn start_block(&mut self, payload: &Value) -> Vec<AgentEvent> {
        let mut notifications = Vec::new();

        if self.open.is_some() {
            // The protocol never interleaves blocks; close the stray one.
            log::warn!("content_block_start while a block is open; finalizing it");
            notifications.extend(self.stop_block());
        }

        let block = &payload["content_block"];
        let block_type = block["type"].as_str().unwrap_or_default();

        self.open = match block_type {
            "text" => Some(OpenBlock::Text(
                block["text"].as_str().unwrap_or_default().to_string(),
            )),
            "thinking" => Some(OpenBlock::Thinking {
                thinking: block["thinking"].as_str().unwrap_or_default().to_string(),
                signature: block["signature"].as_str().unwrap_or_default().to_string(),
            }),
            "tool_use" | "server_tool_use" => {
                match (block["id"].as_str(), block["name"].as_str()) {
                    (Some(id), Some(name)) => {
                        let server = block_type == "server_tool_use"
                            || self.server_tool.as_deref() == Some(name);
                        notifications.push(AgentEvent::ToolUseStarted {
                            id: id.to_string(),
                            name: name.to_string(),
                            server,
                        });
                        Some(OpenBlock::ToolUse {
                            id: id.to_string(),
                            name: name.to_string(),
                            initial: input_from_json(block["input"].clone()).unwrap_or_default(),
                            json: String::new(),
                            server,
                        })
                    }
                    _ => {
                        log::warn!("Ignoring {} block without id or name", block_type);
                        None
                    }
                }
            }
            "web_search_tool_result" => {
                match serde_json::from_value::<ServerToolResultBlock>(block.clone()) {
                    Ok(result) => Some(OpenBlock::ServerResult(result)),
                    Err(e) => {
                        log::warn!("Ignoring malformed server tool result: {}", e);
                        None
                    }
                }
            }
            other => {
                log::debug!("Ignoring unknown block type '{}'", other);
                None
            }
        };

        notifications
    }

    fn apply_delta(&mut self, payload: &Value) -> Vec<AgentEvent> {
        let delta = &payload["delta"];
        let delta_type = delta["type"].as_str().unwrap_or_default();

        match (delta_type, self.open.as_mut()) {
            ("text_delta", Some(OpenBlock::Text(text))) => {
                let fragment = delta["text"].as_str().unwrap_or_default();
                text.push_str(fragment);
                vec![AgentEvent::TextDelta {
                    text: fragment.to_string(),
                }]
            }
            ("thinking_delta", Some(OpenBlock::Thinking { thinking, .. })) => {
                let fragment = delta["thinking"].as_str().unwrap_or_default();
                thinking.push_str(fragment);
                vec![AgentEvent::ThinkingDelta {
                    text: fragment.to_string(),
                }]
            }
            ("signature_delta", Some(OpenBlock::Thinking { signature, .. })) => {
                signature.push_str(delta["signature"].as_str().unwrap_or_default());
                Vec::new()
            }
            ("input_json_delta", Some(OpenBlock::ToolUse { json, .. })) => {
                json.push_str(delta["partial_json"].as_str().unwrap_or_default());
                Vec::new()
            }
            (_, None) => {
                log::debug!("Ignoring {} delta with no open block", delta_type);
                Vec::new()
            }
            (_, Some(open)) => {
                log::debug!(
                    "Ignoring {} delta for {} block",
                    delta_type,
                    kind_of(open)
                );
                Vec::new()
            }
        }
    }

    fn stop_block(&mut self) -> Vec<AgentEvent> {
        let Some(open) = self.open.take() else {
            return Vec::new();
        };

        let block = match open {
            OpenBlock::Text(text) => {
                if text.is_empty() {
                    // Empty text blocks are rejected on replay.
                    log::debug!("Dropping empty text block");
                    return Vec::new();
                }
                ContentBlock::Text(TextBlock::new(text))
            }
            OpenBlock::Thinking {
                thinking,
                signature,
            } => ContentBlock::Thinking(ThinkingBlock::new(thinking, signature)),
            OpenBlock::ToolUse {
                id,
                name,
                initial,
                json,
                server,
            } => {
                let (input, input_error) = self.parse_input(&name, initial, &json);
                self.output.pending.push(PendingToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                    server,
                    input_error,
                });
                let tool_use = ToolUseBlock::new(id, name, input);
                if server {
                    ContentBlock::ServerToolUse(tool_use)
                } else {
                    ContentBlock::ToolUse(tool_use)
                }
            }
            OpenBlock::ServerResult(result) => ContentBlock::ServerToolResult(result),
        };

        self.output.blocks.push(block.clone());
        vec![AgentEvent::BlockFinalized { block }]
    }

    /// Parses accumulated input fragments.
    ///
    /// Empty input falls back to the input carried on the start event (an
    /// empty object when there was none).
    fn parse_input(
        &self,
        name: &str,
        initial: ToolInput,
        json: &str,
    ) -> (ToolInput, Option<String>) {
        if json.trim().is_empty() {
            return (initial, None);
        }

        let parsed = serde_json::from_str::<Value>(json)
            .map_err(|e| e.to_string())
            .and_then(|value| {
                input_from_json(value).ok_or_else(|| "input is not a JSON object".to_string())
            });

        match parsed {
            Ok(input) => (input, None),
            Err(reason) => {
                log::warn!("Unparsable input for tool '{}': {}", name, reason);
                match self.policy {
                    InvalidInputPolicy::DefaultEmpty => (ToolInput::new(), None),
                    InvalidInputPolicy::Reject => (
                        ToolInput::new(),
                        Some(format!("Invalid tool input: {}", reason)),
                    ),
                }
            }
        }
    }
}

fn kind_of(open: &OpenBlock) -> &'static str {
    match open {
        OpenBlock::Text(_) => "text",
        OpenBlock::Thinking { .. } => "thinking",
        OpenBlock::ToolUse { server: false, .. } => "tool_use",
        OpenBlock::ToolUse { server: true, .. } => "server_tool_use",
        OpenBlock::ServerResult(_) => "web_search_tool_result",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ToolValue;
    use serde_json::json;

    fn event(kind: EventKind, payload: Value) -> StreamEvent {
        StreamEvent::new(kind, payload)
    }

    fn start(block: Value) -> StreamEvent {
        event(
            EventKind::BlockStart,
            json!({"type": "content_block_start", "index": 0, "content_block": block}),
        )
    }

    fn delta(delta: Value) -> StreamEvent {
        event(
            EventKind::BlockDelta,
            json!({"type": "content_block_delta", "index": 0, "delta": delta}),
        )
    }

    fn stop() -> StreamEvent {
        event(
            EventKind::BlockStop,
            json!({"type": "content_block_stop", "index": 0}),
        )
    }

    fn message_delta(stop_reason: &str) -> StreamEvent {
        event(
            EventKind::MessageDelta,
            json!({"type": "message_delta", "delta": {"stop_reason": stop_reason}}),
        )
    }

    fn feed(assembler: &mut BlockAssembler, events: Vec<StreamEvent>) -> Vec<AgentEvent> {
        events
            .into_iter()
            .flat_map(|e| assembler.process(e).unwrap())
            .collect()
    }

    #[test]
    fn test_tool_input_reassembled_from_fragments() {
        let mut assembler = BlockAssembler::default();
        feed(
            &mut assembler,
            vec![
                start(json!({"type": "tool_use", "id": "t1", "name": "upload", "input": {}})),
                delta(json!({"type": "input_json_delta", "partial_json": "{\"na"})),
                delta(json!({"type": "input_json_delta", "partial_json": "me\":\"x\","})),
                delta(json!({"type": "input_json_delta", "partial_json": "\"n\":1}"})),
                stop(),
                message_delta("tool_use"),
            ],
        );

        let output = assembler.finish();
        assert!(output.wants_tool_results());
        assert_eq!(output.pending.len(), 1);

        let expected = input_from_json(json!({"name": "x", "n": 1})).unwrap();
        assert_eq!(output.pending[0].input, expected);
        match &output.blocks[0] {
            ContentBlock::ToolUse(tool_use) => {
                assert_eq!(tool_use.id, "t1");
                assert_eq!(tool_use.name, "upload");
                assert_eq!(tool_use.input["n"], ToolValue::Int(1));
            }
            other => panic!("Expected tool use block, got {:?}", other),
        }
    }

    #[test]
    fn test_text_and_thinking_blocks_with_notifications() {
        let mut assembler = BlockAssembler::default();
        let notifications = feed(
            &mut assembler,
            vec![
                start(json!({"type": "thinking", "thinking": ""})),
                delta(json!({"type": "thinking_delta", "thinking": "A scanner "})),
                delta(json!({"type": "thinking_delta", "thinking": "beats stones."})),
                delta(json!({"type": "signature_delta", "signature": "EqQB"})),
                delta(json!({"type": "signature_delta", "signature": "Ckgi"})),
                stop(),
                start(json!({"type": "text", "text": ""})),
                delta(json!({"type": "text_delta", "text": "Try "})),
                delta(json!({"type": "text_delta", "text": "a paper."})),
                stop(),
                message_delta("end_turn"),
            ],
        );

        let output = assembler.finish();
        assert!(!output.wants_tool_results());
        assert_eq!(
            output.blocks,
            vec![
                ContentBlock::Thinking(ThinkingBlock::new("A scanner beats stones.", "EqQBCkgi")),
                ContentBlock::Text(TextBlock::new("Try a paper.")),
            ]
        );

        // Signature deltas are not displayed.
        let deltas: Vec<&AgentEvent> = notifications
            .iter()
            .filter(|n| !matches!(n, AgentEvent::BlockFinalized { .. }))
            .collect();
        assert_eq!(deltas.len(), 4);
        assert_eq!(
            deltas[0],
            &AgentEvent::ThinkingDelta {
                text: "A scanner ".into()
            }
        );
    }

    #[test]
    fn test_empty_input_defaults_to_empty_object() {
        let mut assembler = BlockAssembler::default();
        feed(
            &mut assembler,
            vec![
                start(json!({"type": "tool_use", "id": "t1", "name": "leaderboard"})),
                stop(),
            ],
        );
        let output = assembler.finish();
        assert!(output.pending[0].input.is_empty());
        assert!(output.pending[0].input_error.is_none());
    }

    #[test]
    fn test_unparsable_input_default_policy() {
        let mut assembler = BlockAssembler::new(InvalidInputPolicy::DefaultEmpty);
        feed(
            &mut assembler,
            vec![
                start(json!({"type": "tool_use", "id": "t1", "name": "bash"})),
                delta(json!({"type": "input_json_delta", "partial_json": "{\"cmd\": "})),
                stop(),
            ],
        );
        let output = assembler.finish();
        assert!(output.pending[0].input.is_empty());
        assert!(output.pending[0].input_error.is_none());
    }

    #[test]
    fn test_unparsable_input_reject_policy() {
        let mut assembler = BlockAssembler::new(InvalidInputPolicy::Reject);
        feed(
            &mut assembler,
            vec![
                start(json!({"type": "tool_use", "id": "t1", "name": "bash"})),
                delta(json!({"type": "input_json_delta", "partial_json": "[1,2]"})),
                stop(),
            ],
        );
        let output = assembler.finish();
        let error = output.pending[0].input_error.as_deref().unwrap();
        assert!(error.starts_with("Invalid tool input"));
        // The block itself stays replayable.
        assert_eq!(output.blocks.len(), 1);
    }

    #[test]
    fn test_server_tool_use_and_result() {
        let mut assembler = BlockAssembler::default();
        let notifications = feed(
            &mut assembler,
            vec![
                start(json!({"type": "server_tool_use", "id": "srv_1", "name": "web_search", "input": {}})),
                delta(json!({"type": "input_json_delta", "partial_json": "{\"query\":\"imp gate\"}"})),
                stop(),
                start(json!({
                    "type": "web_search_tool_result",
                    "tool_use_id": "srv_1",
                    "content": [
                        {"type": "web_search_result", "url": "https://corewar.co.uk/imp.htm", "title": "Imps"}
                    ]
                })),
                stop(),
            ],
        );

        assert!(notifications.contains(&AgentEvent::ToolUseStarted {
            id: "srv_1".into(),
            name: "web_search".into(),
            server: true,
        }));

        let output = assembler.finish();
        assert!(output.pending[0].server);
        assert!(matches!(output.blocks[0], ContentBlock::ServerToolUse(_)));
        match &output.blocks[1] {
            ContentBlock::ServerToolResult(result) => {
                assert_eq!(result.tool_use_id, "srv_1");
                assert_eq!(result.entries().len(), 1);
            }
            other => panic!("Expected server tool result, got {:?}", other),
        }
    }

    #[test]
    fn test_reserved_name_is_tagged_server_side() {
        let mut assembler = BlockAssembler::default().with_server_tool("web_search");
        feed(
            &mut assembler,
            vec![
                start(json!({"type": "tool_use", "id": "t9", "name": "web_search", "input": {"query": "dwarf"}})),
                stop(),
            ],
        );
        let output = assembler.finish();
        assert!(output.pending[0].server);
        assert_eq!(output.pending[0].input["query"], ToolValue::from("dwarf"));
        assert!(matches!(output.blocks[0], ContentBlock::ServerToolUse(_)));
    }

    #[test]
    fn test_unknown_types_are_ignored() {
        let mut assembler = BlockAssembler::default();
        feed(
            &mut assembler,
            vec![
                start(json!({"type": "mystery_block"})),
                delta(json!({"type": "text_delta", "text": "lost"})),
                stop(),
                start(json!({"type": "text", "text": ""})),
                delta(json!({"type": "citations_delta", "citation": {}})),
                delta(json!({"type": "text_delta", "text": "kept"})),
                stop(),
            ],
        );
        let output = assembler.finish();
        assert_eq!(output.blocks, vec![ContentBlock::Text(TextBlock::new("kept"))]);
    }

    #[test]
    fn test_message_delta_overwrites_stop_reason() {
        let mut assembler = BlockAssembler::default();
        feed(
            &mut assembler,
            vec![message_delta("max_tokens"), message_delta("tool_use")],
        );
        assert_eq!(assembler.finish().stop_reason.as_deref(), Some("tool_use"));
    }

    #[test]
    fn test_error_event_is_terminal() {
        let mut assembler = BlockAssembler::default();
        let result = assembler.process(event(
            EventKind::Error,
            json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
        ));
        match result {
            Err(Error::Stream(msg)) => assert_eq!(msg, "overloaded_error: Overloaded"),
            other => panic!("Expected stream error, got {:?}", other),
        }
    }

    #[test]
    fn test_unfinished_block_is_discarded() {
        let mut assembler = BlockAssembler::default();
        feed(
            &mut assembler,
            vec![
                start(json!({"type": "text", "text": ""})),
                delta(json!({"type": "text_delta", "text": "half"})),
            ],
        );
        let output = assembler.finish();
        assert!(output.blocks.is_empty());
        assert!(!output.completed);
    }
}
