//! Observation events emitted while a conversation runs.
//!
//! Events are a pure side channel: the controller emits them for live display
//! and never reads them back. Control flow depends only on finalized blocks
//! and the stop reason.

use crate::types::ContentBlock;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Stream of observation events for one session.
pub type AgentEventStream = UnboundedReceiverStream<AgentEvent>;

/// A live notification, in block arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// The host's message was accepted (display text, without injected context).
    UserMessage { text: String },
    /// A request for turn `turn` (1-based within one `send_message`) is about to go out.
    TurnStarted { turn: u32 },
    TextDelta { text: String },
    ThinkingDelta { text: String },
    /// A tool invocation block opened; `server` marks remote-executed tools.
    ToolUseStarted { id: String, name: String, server: bool },
    BlockFinalized { block: ContentBlock },
    ToolResult {
        tool_use_id: String,
        name: String,
        content: String,
        is_error: bool,
    },
    TurnEnded { turn: u32, stop_reason: Option<String> },
    Error { message: String },
    /// The running loop was cancelled and the history repaired.
    Cancelled,
}

/// Sending half of the observation channel.
///
/// The channel only exists once a receiver has been handed out; until then
/// events are dropped on the floor. Sends never fail from the caller's point
/// of view: once the receiver is gone, events are discarded.
#[derive(Debug, Default)]
pub(crate) struct EventSink {
    tx: Option<mpsc::UnboundedSender<AgentEvent>>,
    attached: bool,
}

impl EventSink {
    /// A sink with no receiver yet.
    pub(crate) fn detached() -> Self {
        Self::default()
    }

    /// Opens the channel and returns its receiving half. Only the first
    /// call returns a stream.
    pub(crate) fn attach(&mut self) -> Option<AgentEventStream> {
        if self.attached {
            return None;
        }
        self.attached = true;
        let (tx, rx) = mpsc::unbounded_channel();
        self.tx = Some(tx);
        Some(UnboundedReceiverStream::new(rx))
    }

    pub(crate) fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub(crate) fn emit_all(&self, events: impl IntoIterator<Item = AgentEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}
