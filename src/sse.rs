//! Event stream decoding for server-sent events.
//!
//! The Messages API streams its response as server-sent events:
//!
//! ```text
//! event: content_block_delta
//! data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"MOV"}}
//!
//! event: content_block_stop
//! data: {"type":"content_block_stop","index":0}
//! ```
//!
//! Standard SSE framing dispatches an event on the blank line and names it
//! with the `event:` line. Intermediate line splitting does not reliably
//! preserve either, so this decoder ignores both. Every `data:` line is
//! treated as a self-contained event, and its identity comes from the
//! `type` field inside the JSON payload.
//!
//! # Robustness
//!
//! Lines are dropped, never fatal, when they:
//! - do not start with `data:` (blank lines, `event:` lines, `:` comments)
//! - carry a payload that is not JSON, or JSON without a string `type`
//! - carry a `type` this decoder does not know (newer event kinds)
//!
//! Only a failure of the underlying byte stream ends the event stream with
//! an error.
//!
//! # Flow
//!
//! ```text
//! TransportResponse (status + byte chunks)
//!     │
//!     │ decode_response()   non-success status → Error::Api { status, body }
//!     ▼
//! LineDecoder::push()       bytes → complete lines (chunk boundaries, CRLF)
//!     │
//!     │ decode_line()
//!     ▼
//! Stream<Result<StreamEvent>>
//! ```

use crate::transport::{ByteStream, TransportResponse};
use crate::{Error, Result};
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;

/// Prefix of data-bearing lines.
const DATA_PREFIX: &str = "data:";

/// Kind of a decoded protocol event, taken from the payload's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageStart,
    BlockStart,
    BlockDelta,
    BlockStop,
    MessageDelta,
    MessageStop,
    Heartbeat,
    Error,
}

impl EventKind {
    /// Maps a wire `type` value to an event kind.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "message_start" => Some(EventKind::MessageStart),
            "content_block_start" => Some(EventKind::BlockStart),
            "content_block_delta" => Some(EventKind::BlockDelta),
            "content_block_stop" => Some(EventKind::BlockStop),
            "message_delta" => Some(EventKind::MessageDelta),
            "message_stop" => Some(EventKind::MessageStop),
            "ping" => Some(EventKind::Heartbeat),
            "error" => Some(EventKind::Error),
            _ => None,
        }
    }
}

/// One decoded protocol event.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub kind: EventKind,
    pub payload: Value,
}

impl StreamEvent {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self { kind, payload }
    }
}

/// A pinned, boxed stream of decoded events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Decodes a single line into an event.
///
/// Returns `None` for every line that is not a well-formed, recognised
/// `data:` event. The `[DONE]` sentinel some gateways append is skipped the
/// same way.
pub fn decode_line(line: &str) -> Option<StreamEvent> {
    let line = line.trim_end_matches('\r');
    let data = line.strip_prefix(DATA_PREFIX)?.trim();

    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    let payload: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("Dropping malformed event line: {}", e);
            return None;
        }
    };

    let Some(name) = payload.get("type").and_then(Value::as_str) else {
        log::warn!("Dropping event without a type discriminator");
        return None;
    };

    match EventKind::from_wire(name) {
        Some(kind) => Some(StreamEvent::new(kind, payload)),
        None => {
            log::debug!("Ignoring unknown event type '{}'", name);
            None
        }
    }
}

/// Splits raw body chunks into lines and decodes them.
///
/// Chunks may end mid-line or even mid-character; bytes are buffered until a
/// newline arrives, and only complete lines are converted to text.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns the events completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let line = String::from_utf8_lossy(&self.buffer[start..end]);
            events.extend(decode_line(&line));
            start = end + 1;
        }
        self.buffer.drain(..start);

        events
    }

    /// Decodes whatever remains after the body ends without a final newline.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&String::from_utf8_lossy(&rest))
    }
}

struct DecodeState {
    body: ByteStream,
    decoder: LineDecoder,
    ready: VecDeque<StreamEvent>,
    finished: bool,
}

/// Turns a raw byte stream into a stream of events.
///
/// A read error is yielded once, after every event decoded before it, and
/// ends the stream.
pub fn decode_events(body: ByteStream) -> EventStream {
    let state = DecodeState {
        body,
        decoder: LineDecoder::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    let stream = stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(&chunk);
                    state.ready.extend(events);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.finished = true;
                    let trailing = state.decoder.finish();
                    state.ready.extend(trailing);
                }
            }
        }
    });

    Box::pin(stream)
}

/// Validates the response status and decodes the body.
///
/// A non-success status drains the body into the error so the caller sees
/// exactly what the remote said.
pub async fn decode_response(response: TransportResponse) -> Result<EventStream> {
    let TransportResponse { status, mut body } = response;

    if !(200..300).contains(&status) {
        let mut raw = Vec::new();
        let mut read_failed = false;
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => raw.extend_from_slice(&bytes),
                Err(e) => {
                    log::warn!("Failed to read error response body: {}", e);
                    read_failed = true;
                    break;
                }
            }
        }
        let text = if raw.is_empty() && read_failed {
            "Unknown error (failed to read response body)".to_string()
        } else {
            String::from_utf8_lossy(&raw).into_owned()
        };
        return Err(Error::api(status, text));
    }

    Ok(decode_events(body))
}
