//! Shared test harness: a scripted transport, an SSE turn builder, and a
//! recording tool executor.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::{FutureExt, StreamExt, stream};
use modelwar_agent::transport::ByteStream;
use modelwar_agent::{
    AgentEvent, AgentEventStream, AgentOptions, AgentOptionsBuilder, ContentBlock, Error, Message,
    MessageRole, Result, ToolExecutor, ToolInput, Transport, TransportResponse,
};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Bytes per body chunk. Small and odd so events and characters straddle chunks.
const CHUNK_SIZE: usize = 7;

pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

pub fn options_builder() -> AgentOptionsBuilder {
    AgentOptions::builder()
        .model("claude-test")
        .api_key("sk-ant-test")
        .base_url("http://mock.test/v1")
        .system_prompt("You are a Core War coach")
}

pub fn options() -> AgentOptions {
    options_builder().build().unwrap()
}

// ============================================================================
// SSE turn builder
// ============================================================================

/// Builds the event sequence of one streamed assistant turn.
#[derive(Debug, Clone)]
pub struct TurnScript {
    events: Vec<Value>,
    index: usize,
}

impl Default for TurnScript {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnScript {
    pub fn new() -> Self {
        Self {
            events: vec![json!({
                "type": "message_start",
                "message": {
                    "id": "msg_test",
                    "type": "message",
                    "role": "assistant",
                    "content": [],
                    "model": "claude-test",
                    "stop_reason": null,
                    "usage": {"input_tokens": 12, "output_tokens": 1}
                }
            })],
            index: 0,
        }
    }

    fn open(&mut self, block: Value) -> usize {
        let index = self.index;
        self.index += 1;
        self.events.push(json!({
            "type": "content_block_start",
            "index": index,
            "content_block": block
        }));
        index
    }

    fn delta(&mut self, index: usize, delta: Value) {
        self.events.push(json!({
            "type": "content_block_delta",
            "index": index,
            "delta": delta
        }));
    }

    fn close(&mut self, index: usize) {
        self.events
            .push(json!({"type": "content_block_stop", "index": index}));
    }

    /// A text block streamed word by word.
    pub fn text(mut self, text: &str) -> Self {
        let index = self.open(json!({"type": "text", "text": ""}));
        for word in text.split_inclusive(' ') {
            self.delta(index, json!({"type": "text_delta", "text": word}));
        }
        self.close(index);
        self
    }

    /// A text block that starts streaming but never stops.
    pub fn open_text(mut self, text: &str) -> Self {
        let index = self.open(json!({"type": "text", "text": ""}));
        self.delta(index, json!({"type": "text_delta", "text": text}));
        self
    }

    pub fn thinking(mut self, thinking: &str, signature: &str) -> Self {
        let index = self.open(json!({"type": "thinking", "thinking": ""}));
        self.delta(index, json!({"type": "thinking_delta", "thinking": thinking}));
        self.delta(index, json!({"type": "signature_delta", "signature": signature}));
        self.close(index);
        self
    }

    /// A client tool use whose input arrives as the given raw fragments.
    pub fn tool_use(mut self, id: &str, name: &str, fragments: &[&str]) -> Self {
        let index = self.open(json!({"type": "tool_use", "id": id, "name": name, "input": {}}));
        for fragment in fragments {
            self.delta(index, json!({"type": "input_json_delta", "partial_json": fragment}));
        }
        self.close(index);
        self
    }

    pub fn server_tool_use(mut self, id: &str, name: &str, input: &str) -> Self {
        let index =
            self.open(json!({"type": "server_tool_use", "id": id, "name": name, "input": {}}));
        self.delta(index, json!({"type": "input_json_delta", "partial_json": input}));
        self.close(index);
        self
    }

    pub fn server_result(mut self, tool_use_id: &str, entries: Value) -> Self {
        let index = self.open(json!({
            "type": "web_search_tool_result",
            "tool_use_id": tool_use_id,
            "content": entries
        }));
        self.close(index);
        self
    }

    pub fn ping(mut self) -> Self {
        self.events.push(json!({"type": "ping"}));
        self
    }

    pub fn raw(mut self, event: Value) -> Self {
        self.events.push(event);
        self
    }

    pub fn stop(mut self, reason: &str) -> Self {
        self.events.push(json!({
            "type": "message_delta",
            "delta": {"stop_reason": reason, "stop_sequence": null},
            "usage": {"output_tokens": 42}
        }));
        self.events.push(json!({"type": "message_stop"}));
        self
    }

    /// SSE body with standard `event:` / `data:` framing.
    pub fn body(&self) -> String {
        self.events
            .iter()
            .map(|e| format!("event: {}\ndata: {}\n\n", e["type"].as_str().unwrap_or(""), e))
            .collect()
    }
}

// ============================================================================
// Scripted transport
// ============================================================================

enum Reply {
    Body { status: u16, body: String, tail: Tail },
    Refuse,
}

enum Tail {
    End,
    Hang,
    ReadError,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn messages(&self) -> &[Value] {
        self.body["messages"].as_array().map(Vec::as_slice).unwrap_or(&[])
    }
}

/// In-memory [`Transport`] replaying scripted responses in order.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, reply: Reply) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn turn(self, script: TurnScript) -> Self {
        self.push(Reply::Body {
            status: 200,
            body: script.body(),
            tail: Tail::End,
        })
    }

    /// Streams the script, then never sends another byte.
    pub fn turn_then_hang(self, script: TurnScript) -> Self {
        self.push(Reply::Body {
            status: 200,
            body: script.body(),
            tail: Tail::Hang,
        })
    }

    /// Streams the script, then fails the connection.
    pub fn turn_then_reset(self, script: TurnScript) -> Self {
        self.push(Reply::Body {
            status: 200,
            body: script.body(),
            tail: Tail::ReadError,
        })
    }

    pub fn raw_body(self, body: impl Into<String>) -> Self {
        self.push(Reply::Body {
            status: 200,
            body: body.into(),
            tail: Tail::End,
        })
    }

    pub fn status(self, status: u16, body: impl Into<String>) -> Self {
        self.push(Reply::Body {
            status,
            body: body.into(),
            tail: Tail::End,
        })
    }

    /// Fails to connect at all.
    pub fn refuse(self) -> Self {
        self.push(Reply::Refuse)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

fn chunked(body: &str) -> Vec<Result<Bytes>> {
    body.as_bytes()
        .chunks(CHUNK_SIZE)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect()
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post_stream(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &Value,
    ) -> Result<TransportResponse> {
        self.requests.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.clone()))
                .collect(),
            body: body.clone(),
        });

        let reply = self.replies.lock().unwrap().pop_front();
        let Some(reply) = reply else {
            return Err(Error::other("no scripted reply left"));
        };

        match reply {
            Reply::Refuse => Err(Error::timeout()),
            Reply::Body { status, body, tail } => {
                let chunks = stream::iter(chunked(&body));
                let body: ByteStream = match tail {
                    Tail::End => Box::pin(chunks),
                    Tail::Hang => Box::pin(chunks.chain(stream::pending())),
                    Tail::ReadError => Box::pin(chunks.chain(stream::iter(vec![Err(
                        Error::stream("connection reset by peer"),
                    )]))),
                };
                Ok(TransportResponse { status, body })
            }
        }
    }
}

// ============================================================================
// Recording executor
// ============================================================================

/// Tool executor that records every call.
///
/// Succeeds with `"{name} ok"` unless configured to fail or hang for a tool.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<(String, ToolInput)>>,
    failures: HashMap<String, String>,
    hang_on: Option<String>,
    started: Arc<Notify>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, name: &str, message: &str) -> Self {
        self.failures.insert(name.to_string(), message.to_string());
        self
    }

    pub fn hanging_on(mut self, name: &str) -> Self {
        self.hang_on = Some(name.to_string());
        self
    }

    /// Notified when the hanging tool starts.
    pub fn started(&self) -> Arc<Notify> {
        self.started.clone()
    }

    pub fn calls(&self) -> Vec<(String, ToolInput)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_names(&self) -> Vec<String> {
        self.calls().into_iter().map(|(name, _)| name).collect()
    }
}

#[async_trait]
impl ToolExecutor for RecordingExecutor {
    async fn execute(&self, name: &str, input: ToolInput) -> anyhow::Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), input));

        if self.hang_on.as_deref() == Some(name) {
            self.started.notify_one();
            std::future::pending::<()>().await;
        }

        if let Some(message) = self.failures.get(name) {
            return Err(anyhow::anyhow!(message.clone()));
        }

        Ok(format!("{} ok", name))
    }
}

// ============================================================================
// Assertions
// ============================================================================

/// Events already delivered, without waiting for more.
pub fn drain(events: &mut AgentEventStream) -> Vec<AgentEvent> {
    let mut collected = Vec::new();
    while let Some(Some(event)) = events.next().now_or_never() {
        collected.push(event);
    }
    collected
}

/// Every client tool use is answered by the message right after it.
pub fn assert_paired(history: &[Message]) {
    for (i, message) in history.iter().enumerate() {
        if message.role != MessageRole::Assistant {
            continue;
        }
        let ids: Vec<&str> = message.tool_uses().map(|u| u.id.as_str()).collect();
        if ids.is_empty() {
            continue;
        }

        let next = history
            .get(i + 1)
            .unwrap_or_else(|| panic!("tool uses {:?} in message {} have no results", ids, i));
        assert_eq!(next.role, MessageRole::User);

        let answered: HashSet<&str> = next
            .tool_results()
            .map(|r| r.tool_use_id.as_str())
            .collect();
        for id in ids {
            assert!(answered.contains(id), "tool use {} is unanswered", id);
        }
    }
}

pub fn assistant_count(history: &[Message]) -> usize {
    history
        .iter()
        .filter(|m| m.role == MessageRole::Assistant)
        .count()
}

pub fn tool_result_message_count(history: &[Message]) -> usize {
    history
        .iter()
        .filter(|m| m.tool_results().next().is_some())
        .count()
}

pub fn text_of(block: &ContentBlock) -> Option<&str> {
    match block {
        ContentBlock::Text(t) => Some(&t.text),
        _ => None,
    }
}
