//! Tool call loop controller.
//!
//! [`AgentSession`] owns one conversation and drives it against the remote
//! model: it sends the history, assembles the streamed reply, runs any
//! client-side tools the model asked for, records their results and asks
//! again, until the model stops for a reason other than wanting tool results.
//!
//! # Turn Loop
//!
//! ```text
//! send_message(text)
//!     │  append user message (with injected context)
//!     ▼
//! ┌──────────────────────────────────────────────────┐
//! │ build request from history                       │
//! │ post_stream → decode_response → BlockAssembler   │──► AgentEvent side channel
//! │ append assistant message (finalized blocks)      │
//! │ stop_reason == "tool_use" and pending calls?     │
//! │   no  → Completed                                │
//! │   yes → run client tools sequentially            │
//! │         append one user message of results       │
//! │         └── next turn                            │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! # State Management
//!
//! - **conversation**: the authoritative history; only this controller writes it
//! - **cancel**: a `tokio::sync::watch` flag observed at both suspension
//!   points (awaiting stream events, awaiting a tool)
//! - **sink**: the observation channel; never read back
//!
//! # Cancellation
//!
//! Cancelling is not an error. The loop stops at its current suspension
//! point, records whatever blocks were already finalized, answers any tool
//! use left without a result with "Cancelled by user", and returns
//! [`LoopOutcome::Cancelled`]. The session can be used again right away.
//!
//! ```rust,no_run
//! use modelwar_agent::{AgentOptions, AgentSession, HttpTransport};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let options = AgentOptions::builder()
//!     .model("claude-sonnet-4-5")
//!     .api_key("sk-ant-...")
//!     .build()?;
//! let transport = Arc::new(HttpTransport::new(options.timeout)?);
//! let mut session = AgentSession::start(options, transport, Vec::new(), None);
//!
//! let cancel = session.cancel_handle();
//! tokio::spawn(async move {
//!     tokio::time::sleep(std::time::Duration::from_secs(30)).await;
//!     cancel.cancel();
//! });
//!
//! let outcome = session.send_message("Write me an imp").await?;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

use crate::assembler::{BlockAssembler, PendingToolUse, TurnOutput};
use crate::conversation::Conversation;
use crate::events::{AgentEvent, AgentEventStream, EventSink};
use crate::interrupt::{TURN_ENDED_BEFORE_TOOLS, patch_interrupted, resolve_unanswered};
use crate::prompt::PromptContext;
use crate::retry::retry_with_backoff_conditional;
use crate::sse::{EventStream, decode_response};
use crate::tools::ToolExecutor;
use crate::transport::{HttpTransport, Transport};
use crate::types::{AgentOptions, ApiRequest, ContentBlock, Message, ToolResultBlock};
use crate::{Error, Result};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;

/// How a `send_message` / `run` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The model stopped without asking for (more) tool results.
    Completed,
    /// The loop was cancelled; the history has been repaired.
    Cancelled,
    /// `max_tool_iterations` tool rounds ran without the model finishing.
    IterationLimit,
}

/// Cloneable handle that cancels the running loop of one session.
///
/// A cancel raised while no loop is running applies to the next one, which
/// then stops at its first suspension point. The flag is cleared when a loop
/// returns.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

enum TurnStep {
    Finished(TurnOutput),
    /// Blocks finalized before the cancel arrived.
    Cancelled(Vec<ContentBlock>),
}

enum ToolStep {
    Finished(Vec<ToolResultBlock>),
    Cancelled(Vec<ToolResultBlock>),
    MissingExecutor {
        results: Vec<ToolResultBlock>,
        tool: String,
    },
}

/// A single conversation driven against the remote model.
///
/// Turns are serialized by `&mut self`: one `send_message` runs at a time,
/// and the history is only ever built from fully settled prior turns.
/// Independent sessions share nothing and may run concurrently.
pub struct AgentSession {
    options: AgentOptions,
    transport: Arc<dyn Transport>,
    executor: Option<Arc<dyn ToolExecutor>>,
    conversation: Conversation,
    context: PromptContext,
    sink: EventSink,
    cancel: Arc<watch::Sender<bool>>,
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("options", &self.options)
            .field("executor", &self.executor.is_some())
            .field("messages", &self.conversation.len())
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl AgentSession {
    /// Starts a session over an existing history.
    ///
    /// A history that ends with unanswered tool uses (an app closed mid-turn)
    /// is repaired before anything is sent.
    pub fn start(
        options: AgentOptions,
        transport: Arc<dyn Transport>,
        history: Vec<Message>,
        executor: Option<Arc<dyn ToolExecutor>>,
    ) -> Self {
        let mut conversation = Conversation::from_messages(history);
        let patched = patch_interrupted(&mut conversation);
        if patched > 0 {
            log::info!("Patched {} unanswered tool use(s) in restored history", patched);
        }

        let (cancel, _) = watch::channel(false);

        Self {
            options,
            transport,
            executor,
            conversation,
            context: PromptContext::default(),
            sink: EventSink::detached(),
            cancel: Arc::new(cancel),
        }
    }

    /// Starts a session that talks to the remote API over HTTP.
    pub fn connect(
        options: AgentOptions,
        history: Vec<Message>,
        executor: Option<Arc<dyn ToolExecutor>>,
    ) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(options.timeout)?);
        Ok(Self::start(options, transport, history, executor))
    }

    /// Takes the observation stream. Only the first call returns it.
    ///
    /// Events emitted before this call are not kept.
    pub fn events(&mut self) -> Option<AgentEventStream> {
        self.sink.attach()
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn history(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub fn context(&self) -> &PromptContext {
        &self.context
    }

    /// Replaces the context prepended to subsequent user messages.
    pub fn set_context(&mut self, context: PromptContext) {
        log::debug!("Context updated");
        self.context = context;
    }

    /// Cancels the running loop, if any.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel.clone(),
        }
    }

    /// Appends a user message and runs the loop until it settles.
    ///
    /// Empty (or whitespace-only) messages are ignored.
    ///
    /// # Errors
    ///
    /// Transport, status and stream errors end the loop and are returned
    /// as-is; the partial turn is not recorded. A tool use with no executor
    /// installed fails with [`Error::MissingExecutor`] after its tool use
    /// has been answered with an error result.
    pub async fn send_message(&mut self, text: &str) -> Result<LoopOutcome> {
        if text.trim().is_empty() {
            log::debug!("Ignoring empty user message");
            return Ok(LoopOutcome::Completed);
        }

        self.sink.emit(AgentEvent::UserMessage {
            text: text.to_string(),
        });

        self.conversation.push_user_text(self.context.apply(text));

        self.run().await
    }

    /// Runs the loop over the current history without adding a message.
    ///
    /// Tool uses left without results by an earlier loop are answered with
    /// "Cancelled by user" before the first request goes out.
    pub async fn run(&mut self) -> Result<LoopOutcome> {
        let mut cancel = self.cancel.subscribe();
        let result = self.drive(&mut cancel).await;
        self.cancel.send_replace(false);
        result
    }

    async fn drive(&mut self, cancel: &mut watch::Receiver<bool>) -> Result<LoopOutcome> {
        let patched = patch_interrupted(&mut self.conversation);
        if patched > 0 {
            log::info!("Patched {} unanswered tool use(s) before sending", patched);
        }

        let mut turn = 0u32;
        let mut tool_rounds = 0u32;

        loop {
            turn += 1;
            self.sink.emit(AgentEvent::TurnStarted { turn });
            log::debug!(
                "Turn {} starting with {} message(s)",
                turn,
                self.conversation.len()
            );

            let output = match self.stream_turn(cancel).await {
                Ok(TurnStep::Finished(output)) => output,
                Ok(TurnStep::Cancelled(blocks)) => {
                    self.conversation.push_assistant(blocks);
                    return Ok(self.finish_cancelled());
                }
                Err(e) => {
                    log::error!("Turn {} failed: {}", turn, e);
                    self.sink.emit(AgentEvent::Error {
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            };

            self.sink.emit(AgentEvent::TurnEnded {
                turn,
                stop_reason: output.stop_reason.clone(),
            });

            if !output.completed {
                log::warn!("Turn {} ended without message_stop", turn);
            }
            if !self.conversation.push_assistant(output.blocks.clone()) {
                log::warn!("Turn {} produced no content blocks", turn);
            }

            if !output.wants_tool_results() || output.pending.is_empty() {
                let skipped = resolve_unanswered(&mut self.conversation, TURN_ENDED_BEFORE_TOOLS);
                if skipped > 0 {
                    log::warn!(
                        "Turn {} stopped ({}) with {} tool use(s) not executed",
                        turn,
                        output.stop_reason.as_deref().unwrap_or("no stop reason"),
                        skipped
                    );
                }
                return Ok(LoopOutcome::Completed);
            }

            if let Some(limit) = self.options.max_tool_iterations {
                if tool_rounds >= limit {
                    log::warn!("Tool iteration limit ({}) reached", limit);
                    resolve_unanswered(&mut self.conversation, "Tool iteration limit reached");
                    return Ok(LoopOutcome::IterationLimit);
                }
            }
            tool_rounds += 1;

            match self.execute_tools(&output.pending, cancel).await {
                ToolStep::Finished(results) => {
                    // Only server tools were pending: nothing to send back.
                    if !self.conversation.push_tool_results(results) {
                        return Ok(LoopOutcome::Completed);
                    }
                }
                ToolStep::Cancelled(results) => {
                    self.conversation.push_tool_results(results);
                    return Ok(self.finish_cancelled());
                }
                ToolStep::MissingExecutor { results, tool } => {
                    let error = Error::missing_executor(tool);
                    self.conversation.push_tool_results(results);
                    resolve_unanswered(&mut self.conversation, &error.to_string());
                    self.sink.emit(AgentEvent::Error {
                        message: error.to_string(),
                    });
                    return Err(error);
                }
            }
        }
    }

    fn finish_cancelled(&mut self) -> LoopOutcome {
        let patched = patch_interrupted(&mut self.conversation);
        log::info!("Loop cancelled ({} tool use(s) patched)", patched);
        self.sink.emit(AgentEvent::Cancelled);
        LoopOutcome::Cancelled
    }

    /// Streams one turn and assembles its blocks.
    async fn stream_turn(&self, cancel: &mut watch::Receiver<bool>) -> Result<TurnStep> {
        let request = ApiRequest::new(&self.options, self.conversation.messages());
        let body = serde_json::to_value(&request)?;
        let url = self.options.messages_url();
        let headers = self.headers();

        let mut events = tokio::select! {
            biased;
            _ = cancelled(cancel) => return Ok(TurnStep::Cancelled(Vec::new())),
            opened = self.open_stream(&url, &headers, &body) => opened?,
        };

        let mut assembler = BlockAssembler::new(self.options.invalid_input_policy);
        if let Some(server) = &self.options.server_tool {
            assembler = assembler.with_server_tool(server.name());
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = cancelled(cancel) => {
                    let output = assembler.finish();
                    return Ok(TurnStep::Cancelled(output.blocks));
                }
                next = events.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    let notifications = assembler.process(event)?;
                    self.sink.emit_all(notifications);
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        Ok(TurnStep::Finished(assembler.finish()))
    }

    /// Opens the response stream, retrying per [`AgentOptions::retry`].
    async fn open_stream(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &serde_json::Value,
    ) -> Result<EventStream> {
        match &self.options.retry {
            Some(config) => {
                retry_with_backoff_conditional(config.clone(), || {
                    self.open_stream_once(url, headers, body)
                })
                .await
            }
            None => self.open_stream_once(url, headers, body).await,
        }
    }

    async fn open_stream_once(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &serde_json::Value,
    ) -> Result<EventStream> {
        let response = self.transport.post_stream(url, headers, body).await?;
        decode_response(response).await
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("x-api-key", self.options.api_key.clone()),
            ("anthropic-version", self.options.api_version.clone()),
        ]
    }

    /// Runs the client-side tools of one turn, strictly in emission order.
    async fn execute_tools(
        &self,
        pending: &[PendingToolUse],
        cancel: &mut watch::Receiver<bool>,
    ) -> ToolStep {
        let mut results = Vec::new();

        for call in pending {
            if call.server || self.options.is_server_tool(&call.name) {
                log::debug!("Skipping server tool '{}' ({})", call.name, call.id);
                continue;
            }

            let result = if let Some(reason) = &call.input_error {
                ToolResultBlock::error(&call.id, reason)
            } else if !self.options.tool_policy.permits(&call.name) {
                log::warn!("Model called disallowed tool '{}'", call.name);
                ToolResultBlock::error(&call.id, format!("Tool '{}' is not permitted", call.name))
            } else {
                let Some(executor) = &self.executor else {
                    return ToolStep::MissingExecutor {
                        results,
                        tool: call.name.clone(),
                    };
                };

                log::debug!("Executing tool '{}' ({})", call.name, call.id);
                let outcome = tokio::select! {
                    biased;
                    _ = cancelled(cancel) => return ToolStep::Cancelled(results),
                    outcome = executor.execute(&call.name, call.input.clone()) => outcome,
                };

                match outcome {
                    Ok(content) => ToolResultBlock::new(&call.id, content),
                    Err(e) => {
                        log::warn!("Tool '{}' failed: {}", call.name, e);
                        ToolResultBlock::error(&call.id, e.to_string())
                    }
                }
            };

            self.sink.emit(AgentEvent::ToolResult {
                tool_use_id: result.tool_use_id.clone(),
                name: call.name.clone(),
                content: result.content.clone(),
                is_error: result.is_error,
            });
            results.push(result);
        }

        ToolStep::Finished(results)
    }
}

/// Resolves once the cancel flag is set.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|flag| *flag).await.is_err() {
        // Sender gone: cancellation can no longer happen.
        std::future::pending::<()>().await;
    }
}
