//! Configuration helpers: environment resolution and credential providers

use std::env;

use crate::types::DEFAULT_BASE_URL;

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Environment variable overriding the model identifier
pub const MODEL_ENV: &str = "MODELWAR_AGENT_MODEL";

/// Environment variable overriding the API base URL
pub const BASE_URL_ENV: &str = "MODELWAR_AGENT_BASE_URL";

/// Source of the API key and model identifier.
///
/// The host application usually backs this with its own credential storage;
/// the engine only reads from it when options are built.
pub trait CredentialProvider: Send + Sync {
    fn api_key(&self) -> Option<String>;

    fn model(&self) -> Option<String>;
}

/// Credentials read from the process environment
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    fallback_model: Option<String>,
}

impl EnvCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Model to use when `MODELWAR_AGENT_MODEL` is unset
    pub fn with_fallback_model(mut self, model: impl Into<String>) -> Self {
        self.fallback_model = Some(model.into());
        self
    }
}

impl CredentialProvider for EnvCredentials {
    fn api_key(&self) -> Option<String> {
        get_api_key()
    }

    fn model(&self) -> Option<String> {
        get_model(self.fallback_model.as_deref(), true)
    }
}

/// Fixed credentials, e.g. loaded by the host from its keychain
#[derive(Clone)]
pub struct StaticCredentials {
    api_key: String,
    model: Option<String>,
}

impl StaticCredentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("api_key", &"***")
            .field("model", &self.model)
            .finish()
    }
}

impl CredentialProvider for StaticCredentials {
    fn api_key(&self) -> Option<String> {
        Some(self.api_key.clone()).filter(|k| !k.is_empty())
    }

    fn model(&self) -> Option<String> {
        self.model.clone()
    }
}

/// Get the API key from the environment; empty values count as unset
pub fn get_api_key() -> Option<String> {
    env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty())
}

/// Get the base URL from environment variable or fallback
///
/// Priority:
/// 1. MODELWAR_AGENT_BASE_URL environment variable
/// 2. fallback parameter
/// 3. the public Messages API endpoint
pub fn get_base_url(fallback: Option<&str>) -> String {
    if let Ok(url) = env::var(BASE_URL_ENV) {
        return url;
    }

    fallback.unwrap_or(DEFAULT_BASE_URL).to_string()
}

/// Get the model name from environment variable or fallback
///
/// Priority:
/// 1. MODELWAR_AGENT_MODEL environment variable (if prefer_env is true)
/// 2. fallback parameter
pub fn get_model(fallback: Option<&str>, prefer_env: bool) -> Option<String> {
    if prefer_env {
        if let Ok(model) = env::var(MODEL_ENV) {
            return Some(model);
        }
    }

    fallback.map(|s| s.to_string())
}
