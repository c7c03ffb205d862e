//! # ModelWar Agent - Streaming Agentic Conversation Engine
//!
//! The conversation engine behind the ModelWar assistant: it drives a
//! multi-turn, tool-calling conversation against the streaming Messages API,
//! reassembles the event stream into structured content blocks, runs client
//! tools inline, and loops until the model produces a final answer.
//!
//! ## Key Features
//!
//! - **Streaming Responses**: Text and thinking deltas forwarded as they arrive
//! - **Tool Calling**: Client tools via an injected executor; server tools
//!   (web search) recognised and never run locally
//! - **Cancellation**: Stop at any suspension point without corrupting history
//! - **Interruption Repair**: Unanswered tool uses are closed with
//!   "Cancelled by user" results before the history is reused
//! - **Context Injection**: Editor state prepended to each user message
//! - **Context Management**: Token estimation and pair-safe truncation
//! - **Retry Logic**: Opt-in exponential backoff for opening requests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modelwar_agent::{AgentEvent, AgentOptions, AgentSession, FnExecutor, ToolSchema};
//! use futures::StreamExt;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = AgentOptions::builder()
//!         .system_prompt("You are a Core War coach")
//!         .model("claude-sonnet-4-5")
//!         .api_key(std::env::var("ANTHROPIC_API_KEY")?)
//!         .tool(ToolSchema::new(
//!             "leaderboard",
//!             "Fetch the current hill standings",
//!             json!({"type": "object", "properties": {}}),
//!         ))
//!         .build()?;
//!
//!     let executor = Arc::new(FnExecutor::new(|name, _input| async move {
//!         Ok(format!("{} is empty today", name))
//!     }));
//!
//!     let mut session = AgentSession::connect(options, Vec::new(), Some(executor))?;
//!     let mut events = session.events().expect("events taken once");
//!
//!     tokio::spawn(async move {
//!         while let Some(event) = events.next().await {
//!             if let AgentEvent::TextDelta { text } = event {
//!                 print!("{}", text);
//!             }
//!         }
//!     });
//!
//!     session.send_message("Who is on top of the hill?").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **sse**: Event stream decoder (bytes → typed protocol events)
//! - **assembler**: Content block assembler (events → finalized blocks)
//! - **controller**: Tool call loop controller and session lifecycle
//! - **conversation**: Authoritative append-only message store
//! - **interrupt**: Repair of unanswered tool uses after cancellation
//! - **events**: Observation side channel
//! - **transcript**: Display projection folded from events
//! - **transport**: Streaming HTTP seam
//! - **types**: Messages, content blocks, and configuration
//! - **value**: Closed value type for tool inputs
//! - **tools**: Tool schemas, executor seam, and policy
//! - **prompt**: Context injected into user messages
//! - **config**: Environment and credential resolution
//! - **context**: Token estimation and message truncation
//! - **retry**: Exponential backoff retry logic with jitter
//! - **error**: Error types and conversions

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

/// Content block assembly from streamed events.
/// Holds at most one open block and freezes it on `content_block_stop`.
mod assembler;

/// Environment resolution and credential providers.
mod config;

/// Context window management utilities for token estimation and history truncation.
mod context;

/// Tool call loop controller: `AgentSession`, cancellation, and loop outcomes.
mod controller;

/// Append-only conversation store, the source of truth for requests.
mod conversation;

/// Error types and conversions.
/// Defines the `Error` enum and `Result<T>` type alias used across all public APIs.
mod error;

/// Observation events emitted while a conversation runs.
mod events;

/// Repair of histories left with unanswered tool uses.
mod interrupt;

/// Editor context prepended to outgoing user messages.
mod prompt;

/// Tool schemas, the executor seam, closure-backed tools, and tool policy.
mod tools;

/// Display projection of a running conversation.
mod transcript;

/// Core type definitions for messages, content blocks, and agent configuration.
mod types;

/// Closed value type for tool inputs.
mod value;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

/// Retry utilities with exponential backoff and jitter.
pub mod retry;

/// Server-sent event decoding. Public so hosts can decode recorded streams.
pub mod sse;

/// Streaming HTTP seam and its `reqwest` implementation.
pub mod transport;

// --- Session API ---

pub use controller::{AgentSession, CancelHandle, LoopOutcome};

// --- Assembly ---

pub use assembler::{BlockAssembler, PendingToolUse, STOP_REASON_TOOL_USE, TurnOutput};

// --- Conversation Store ---

pub use conversation::Conversation;
pub use interrupt::{
    CANCELLED_BY_USER, TURN_ENDED_BEFORE_TOOLS, patch_interrupted, resolve_unanswered,
};

// --- Observation ---

pub use events::{AgentEvent, AgentEventStream};
pub use transcript::{DEFAULT_MAX_PAYLOAD_CHARS, Transcript, TranscriptEntry};

// --- Configuration ---

pub use config::{
    API_KEY_ENV, BASE_URL_ENV, CredentialProvider, EnvCredentials, MODEL_ENV, StaticCredentials,
    get_api_key, get_base_url, get_model,
};
pub use prompt::PromptContext;

// --- Context Management ---

pub use context::{estimate_tokens, is_approaching_limit, truncate_messages};

// --- Error Handling ---

pub use error::{Error, Result};

// --- Tool System ---

pub use tools::{
    FnExecutor, ServerTool, Tool, ToolBuilder, ToolExecutor, ToolHandler, ToolPolicy,
    ToolRegistry, ToolSchema, WEB_SEARCH_TOOL_NAME, WEB_SEARCH_TOOL_TYPE, tool,
};

// --- Transport ---

pub use transport::{HttpTransport, Transport, TransportResponse};

// --- Core Types ---

pub use types::{
    AgentOptions, AgentOptionsBuilder, ApiRequest, ContentBlock, DEFAULT_API_VERSION,
    DEFAULT_BASE_URL, InvalidInputPolicy, Message, MessageContent, MessageRole,
    ServerToolContent, ServerToolResultBlock, TextBlock, ThinkingBlock, ThinkingConfig,
    ToolResultBlock, ToolUseBlock,
};
pub use value::{ToolInput, ToolValue, input_from_json, input_to_json};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// Convenience module containing the most commonly used types and functions.
/// Import with `use modelwar_agent::prelude::*;`.
pub mod prelude {
    pub use crate::{
        AgentEvent, AgentOptions, AgentOptionsBuilder, AgentSession, CancelHandle, ContentBlock,
        Error, FnExecutor, LoopOutcome, Message, PromptContext, Result, ServerTool, TextBlock,
        Tool, ToolExecutor, ToolInput, ToolRegistry, ToolSchema, ToolUseBlock, ToolValue, tool,
    };
}
