//! Core types for the agent engine

use crate::retry::RetryConfig;
use crate::tools::{ServerTool, ToolPolicy, ToolSchema};
use crate::value::{ToolInput, ToolValue};
use serde::{Deserialize, Serialize};

/// Default endpoint for the Messages API.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// API version header value sent with every request.
pub const DEFAULT_API_VERSION: &str = "2023-06-01";

/// What to do when a tool invocation's streamed input does not parse as JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidInputPolicy {
    /// Run the tool with an empty input object.
    #[default]
    DefaultEmpty,
    /// Answer the invocation with an error result without running the tool.
    Reject,
}

/// Options for configuring an agent session
#[derive(Clone)]
pub struct AgentOptions {
    /// System instruction, assembled by the host and passed through opaquely
    pub system_prompt: String,

    /// Model identifier
    pub model: String,

    /// Messages API base URL (without the `/messages` suffix)
    pub base_url: String,

    /// API key sent as `x-api-key`
    pub api_key: String,

    /// Value of the `anthropic-version` header
    pub api_version: String,

    /// Maximum tokens to generate per turn
    pub max_tokens: u32,

    /// Sampling temperature (None uses provider default)
    pub temperature: Option<f32>,

    /// Extended thinking budget in tokens (None disables thinking)
    pub thinking_budget: Option<u32>,

    /// Connect/read timeout in seconds
    pub timeout: u64,

    /// Client-side tool declarations
    pub tools: Vec<ToolSchema>,

    /// At most one server-executed tool declaration
    pub server_tool: Option<ServerTool>,

    /// Which declared tools the model may use
    pub tool_policy: ToolPolicy,

    /// Maximum tool rounds per `send_message` (None is unbounded)
    pub max_tool_iterations: Option<u32>,

    /// Handling of tool inputs that fail to parse
    pub invalid_input_policy: InvalidInputPolicy,

    /// Retry policy for opening a request (None never retries)
    pub retry: Option<RetryConfig>,
}

impl std::fmt::Debug for AgentOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentOptions")
            .field("system_prompt", &self.system_prompt)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .field("api_version", &self.api_version)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("thinking_budget", &self.thinking_budget)
            .field("timeout", &self.timeout)
            .field("tools", &format!("{} tools", self.tools.len()))
            .field("server_tool", &self.server_tool)
            .field("tool_policy", &self.tool_policy)
            .field("max_tool_iterations", &self.max_tool_iterations)
            .field("invalid_input_policy", &self.invalid_input_policy)
            .field("retry", &self.retry)
            .finish()
    }
}

impl AgentOptions {
    /// Create a new builder for AgentOptions
    pub fn builder() -> AgentOptionsBuilder {
        AgentOptionsBuilder::default()
    }

    /// Full URL of the streaming messages endpoint
    pub fn messages_url(&self) -> String {
        format!("{}/messages", self.base_url.trim_end_matches('/'))
    }

    /// Tool declarations in wire format, honouring the tool policy
    pub fn declared_tools(&self) -> Vec<serde_json::Value> {
        let mut declared: Vec<serde_json::Value> = self
            .tools
            .iter()
            .filter(|t| self.tool_policy.permits(t.name()))
            .map(ToolSchema::to_wire_format)
            .collect();

        if let Some(server) = &self.server_tool {
            if self.tool_policy.permits(server.name()) {
                declared.push(server.to_wire_format());
            }
        }

        declared
    }

    /// True when `name` is the declared server-executed tool
    pub fn is_server_tool(&self, name: &str) -> bool {
        self.server_tool
            .as_ref()
            .is_some_and(|server| server.name() == name)
    }
}

/// Builder for AgentOptions
#[derive(Default)]
pub struct AgentOptionsBuilder {
    system_prompt: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    api_version: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    thinking_budget: Option<u32>,
    timeout: Option<u64>,
    tools: Vec<ToolSchema>,
    server_tool: Option<ServerTool>,
    tool_policy: ToolPolicy,
    max_tool_iterations: Option<u32>,
    invalid_input_policy: InvalidInputPolicy,
    retry: Option<RetryConfig>,
}

impl std::fmt::Debug for AgentOptionsBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentOptionsBuilder")
            .field("system_prompt", &self.system_prompt)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("tools", &format!("{} tools", self.tools.len()))
            .finish()
    }
}

impl AgentOptionsBuilder {
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Takes the API key, and the model when one is configured, from a provider.
    pub fn credentials(mut self, provider: &dyn crate::config::CredentialProvider) -> Self {
        if let Some(key) = provider.api_key() {
            self.api_key = Some(key);
        }
        if let Some(model) = provider.model() {
            self.model = Some(model);
        }
        self
    }

    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn thinking_budget(mut self, tokens: u32) -> Self {
        self.thinking_budget = Some(tokens);
        self
    }

    pub fn timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn tool(mut self, tool: ToolSchema) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn server_tool(mut self, tool: ServerTool) -> Self {
        self.server_tool = Some(tool);
        self
    }

    pub fn tool_policy(mut self, policy: ToolPolicy) -> Self {
        self.tool_policy = policy;
        self
    }

    pub fn max_tool_iterations(mut self, iterations: u32) -> Self {
        self.max_tool_iterations = Some(iterations);
        self
    }

    pub fn invalid_input_policy(mut self, policy: InvalidInputPolicy) -> Self {
        self.invalid_input_policy = policy;
        self
    }

    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    pub fn build(self) -> crate::Result<AgentOptions> {
        let model = self
            .model
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| crate::Error::config("model is required"))?;

        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| crate::Error::config("api_key is required"))?;

        let max_tokens = self.max_tokens.unwrap_or(8192);
        if max_tokens == 0 {
            return Err(crate::Error::config("max_tokens must be greater than zero"));
        }

        if let Some(budget) = self.thinking_budget {
            if budget >= max_tokens {
                return Err(crate::Error::config(format!(
                    "thinking budget ({}) must be below max_tokens ({})",
                    budget, max_tokens
                )));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for tool in &self.tools {
            if !seen.insert(tool.name()) {
                return Err(crate::Error::config(format!(
                    "duplicate tool name '{}'",
                    tool.name()
                )));
            }
        }
        if let Some(server) = &self.server_tool {
            if seen.contains(server.name()) {
                return Err(crate::Error::config(format!(
                    "tool name '{}' is reserved for the server tool",
                    server.name()
                )));
            }
        }

        Ok(AgentOptions {
            system_prompt: self.system_prompt.unwrap_or_default(),
            model,
            base_url: self.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            api_version: self
                .api_version
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            max_tokens,
            temperature: self.temperature,
            thinking_budget: self.thinking_budget,
            timeout: self.timeout.unwrap_or(300),
            tools: self.tools,
            server_tool: self.server_tool,
            tool_policy: self.tool_policy,
            max_tool_iterations: self.max_tool_iterations,
            invalid_input_policy: self.invalid_input_policy,
            retry: self.retry,
        })
    }
}

/// Message role in the conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Content block types that can appear in messages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(TextBlock),
    Thinking(ThinkingBlock),
    ToolUse(ToolUseBlock),
    ServerToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
    #[serde(rename = "web_search_tool_result")]
    ServerToolResult(ServerToolResultBlock),
}

impl ContentBlock {
    /// The invocation block if this is a client-side tool use
    pub fn as_tool_use(&self) -> Option<&ToolUseBlock> {
        match self {
            ContentBlock::ToolUse(tool_use) => Some(tool_use),
            _ => None,
        }
    }

    /// The result block if this is a client-side tool result
    pub fn as_tool_result(&self) -> Option<&ToolResultBlock> {
        match self {
            ContentBlock::ToolResult(result) => Some(result),
            _ => None,
        }
    }

    /// Short name of the block kind, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ContentBlock::Text(_) => "text",
            ContentBlock::Thinking(_) => "thinking",
            ContentBlock::ToolUse(_) => "tool_use",
            ContentBlock::ServerToolUse(_) => "server_tool_use",
            ContentBlock::ToolResult(_) => "tool_result",
            ContentBlock::ServerToolResult(_) => "web_search_tool_result",
        }
    }
}

/// Text content block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextBlock {
    pub text: String,
}

impl TextBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Reasoning block; `signature` is the opaque continuity token that must be
/// replayed unchanged
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThinkingBlock {
    pub thinking: String,
    #[serde(default)]
    pub signature: String,
}

impl ThinkingBlock {
    pub fn new(thinking: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            thinking: thinking.into(),
            signature: signature.into(),
        }
    }
}

/// Tool invocation block, shared by client and server tool uses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: ToolInput,
}

impl ToolUseBlock {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: ToolInput) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// Tool result block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResultBlock {
    pub fn new(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// Payload of a server tool result: a list of entries, or an error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ServerToolContent {
    Entries(Vec<ToolValue>),
    Error(ToolValue),
}

impl Default for ServerToolContent {
    fn default() -> Self {
        ServerToolContent::Entries(Vec::new())
    }
}

/// Server-executed tool result, delivered fully formed by the remote service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerToolResultBlock {
    pub tool_use_id: String,
    #[serde(default)]
    pub content: ServerToolContent,
}

impl ServerToolResultBlock {
    pub fn new(tool_use_id: impl Into<String>, entries: Vec<ToolValue>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: ServerToolContent::Entries(entries),
        }
    }

    /// Result entries; empty when the payload is an error object
    pub fn entries(&self) -> &[ToolValue] {
        match &self.content {
            ServerToolContent::Entries(entries) => entries,
            ServerToolContent::Error(_) => &[],
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.content, ServerToolContent::Error(_))
    }
}

/// Message content: a rendered string or an ordered block list, never both
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: MessageContent,
}

impl Message {
    pub fn new(role: MessageRole, content: MessageContent) -> Self {
        Self { role, content }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: MessageContent::Blocks(content),
        }
    }

    /// Create a user message with custom content blocks (tool results)
    pub fn user_with_blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageContent::Blocks(content),
        }
    }

    /// Content blocks, or an empty slice for string content
    pub fn blocks(&self) -> &[ContentBlock] {
        match &self.content {
            MessageContent::Blocks(blocks) => blocks,
            MessageContent::Text(_) => &[],
        }
    }

    /// Client-side tool invocations carried by this message, in order
    pub fn tool_uses(&self) -> impl Iterator<Item = &ToolUseBlock> {
        self.blocks().iter().filter_map(ContentBlock::as_tool_use)
    }

    /// Tool results carried by this message, in order
    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResultBlock> {
        self.blocks().iter().filter_map(ContentBlock::as_tool_result)
    }

    /// Plain text of the message (string content or joined text blocks)
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text(t) => Some(t.text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Extended thinking request parameters
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ThinkingConfig {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub budget_tokens: u32,
}

impl ThinkingConfig {
    pub fn enabled(budget_tokens: u32) -> Self {
        Self {
            kind: "enabled",
            budget_tokens,
        }
    }
}

/// Streaming Messages API request body
#[derive(Debug, Clone, Serialize)]
pub struct ApiRequest<'a> {
    pub model: &'a str,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub system: &'a str,
    pub messages: &'a [Message],
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
}

impl<'a> ApiRequest<'a> {
    /// Builds a streaming request from the fixed options and current history
    pub fn new(options: &'a AgentOptions, messages: &'a [Message]) -> Self {
        Self {
            model: &options.model,
            max_tokens: options.max_tokens,
            system: &options.system_prompt,
            messages,
            stream: true,
            temperature: options.temperature,
            tools: options.declared_tools(),
            thinking: options.thinking_budget.map(ThinkingConfig::enabled),
        }
    }
}
