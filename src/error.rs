//! Error types for the agent engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP transport error (connection failure, body read failure)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The remote API rejected the request with a non-success status
    #[error("Remote rejected request ({status}): {body}")]
    Api { status: u16, body: String },

    /// Streaming error after a successful response status
    #[error("Streaming error: {0}")]
    Stream(String),

    /// A client-side tool was requested but no executor is installed
    #[error("No tool executor configured for tool '{tool}'")]
    MissingExecutor { tool: String },

    /// Tool lookup or dispatch error
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Timeout error
    #[error("Request timeout")]
    Timeout,

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a "remote rejected request" error
    pub fn api(status: u16, body: impl Into<String>) -> Self {
        Error::Api {
            status,
            body: body.into(),
        }
    }

    /// Create a new stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    /// Create a new tool error
    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    /// Create a missing-executor error for the named tool
    pub fn missing_executor(tool: impl Into<String>) -> Self {
        Error::MissingExecutor { tool: tool.into() }
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a new other error
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Create a timeout error
    pub fn timeout() -> Self {
        Error::Timeout
    }

    /// HTTP status carried by this error, when the remote produced one
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
