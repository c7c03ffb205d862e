//! # Tool declarations and the executor seam
//!
//! The loop controller never runs tools itself. It declares tool schemas to
//! the model, and when the model asks for a client-side tool it hands the
//! call to a [`ToolExecutor`] supplied by the host application.
//!
//! ## Pieces
//!
//! - [`ToolSchema`]: name, description and JSON Schema for one client tool.
//!   Simple notation (`{"cmd": "string"}`) is normalised into a full object
//!   schema.
//! - [`ServerTool`]: the single server-executed capability (web search). The
//!   controller recognises its reserved name and never dispatches it locally.
//! - [`ToolPolicy`]: allow/deny lists. Denied tools are not declared, and a
//!   call to one is answered with an error result instead of running it.
//! - [`ToolExecutor`]: the async trait the host implements. Failures are
//!   plain `anyhow::Error`s; their message is fed back to the model.
//! - [`Tool`] / [`ToolRegistry`]: closure-backed tools and a name-dispatching
//!   executor built from them, for hosts that do not need a custom executor.
//!
//! ## Example
//!
//! ```rust
//! use modelwar_agent::{tool, ToolRegistry};
//!
//! let registry = ToolRegistry::new().with(
//!     tool("leaderboard", "Fetch the top players")
//!         .param("limit", "integer")
//!         .build(|input| async move {
//!             let limit = input.get("limit").and_then(|v| v.as_i64()).unwrap_or(10);
//!             Ok(format!("top {} players", limit))
//!         }),
//! );
//! assert_eq!(registry.schemas().len(), 1);
//! ```

use crate::value::ToolInput;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Reserved name of the built-in server-side search tool.
pub const WEB_SEARCH_TOOL_NAME: &str = "web_search";

/// Wire type identifier of the server-side search tool.
pub const WEB_SEARCH_TOOL_TYPE: &str = "web_search_20250305";

/// Declaration of one client-side tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSchema {
    name: String,
    description: String,
    input_schema: Value,
}

impl ToolSchema {
    /// Creates a schema, normalising simple-notation input schemas.
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: normalize_schema(input_schema),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    /// Tool declaration as sent in the request's `tools` array.
    pub fn to_wire_format(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.input_schema
        })
    }
}

/// Declaration of the server-executed search capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTool {
    name: String,
    kind: String,
    max_uses: Option<u32>,
    allowed_domains: Vec<String>,
}

impl ServerTool {
    /// The built-in web search tool under its reserved name.
    pub fn web_search() -> Self {
        Self {
            name: WEB_SEARCH_TOOL_NAME.to_string(),
            kind: WEB_SEARCH_TOOL_TYPE.to_string(),
            max_uses: None,
            allowed_domains: Vec::new(),
        }
    }

    /// Caps the number of searches per request.
    pub fn with_max_uses(mut self, max_uses: u32) -> Self {
        self.max_uses = Some(max_uses);
        self
    }

    /// Restricts results to the given domains.
    pub fn with_allowed_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn to_wire_format(&self) -> Value {
        let mut declaration = serde_json::json!({
            "type": self.kind,
            "name": self.name,
        });
        if let Some(max_uses) = self.max_uses {
            declaration["max_uses"] = Value::from(max_uses);
        }
        if !self.allowed_domains.is_empty() {
            declaration["allowed_domains"] = Value::from(self.allowed_domains.clone());
        }
        declaration
    }
}

/// Allow/deny lists over tool names.
///
/// An empty allow list permits everything not explicitly denied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolPolicy {
    allowed: Option<HashSet<String>>,
    disallowed: HashSet<String>,
}

impl ToolPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only the named tools may be used.
    pub fn allow<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed
            .get_or_insert_with(HashSet::new)
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// The named tools may never be used, even if allowed.
    pub fn deny<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disallowed.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn permits(&self, name: &str) -> bool {
        if self.disallowed.contains(name) {
            return false;
        }
        match &self.allowed {
            Some(allowed) => allowed.contains(name),
            None => true,
        }
    }
}

/// Host capability that runs client-side tools.
///
/// Must be safe to call repeatedly. Any internal failure is returned as an
/// error; its `Display` text becomes the error result shown to the model.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, input: ToolInput) -> anyhow::Result<String>;
}

/// Adapts an async closure `(name, input) -> Result<String>` into a [`ToolExecutor`].
pub struct FnExecutor<F> {
    f: F,
}

impl<F> FnExecutor<F> {
    pub fn new<Fut>(f: F) -> Self
    where
        F: Fn(String, ToolInput) -> Fut + Send + Sync,
        Fut: Future<Output = anyhow::Result<String>> + Send,
    {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> ToolExecutor for FnExecutor<F>
where
    F: Fn(String, ToolInput) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<String>> + Send,
{
    async fn execute(&self, name: &str, input: ToolInput) -> anyhow::Result<String> {
        (self.f)(name.to_string(), input).await
    }
}

/// Type-erased async tool handler.
pub type ToolHandler = Arc<
    dyn Fn(ToolInput) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>>
        + Send
        + Sync,
>;

/// A client-side tool: its declaration plus the handler that runs it.
#[derive(Clone)]
pub struct Tool {
    schema: ToolSchema,
    handler: ToolHandler,
}

impl Tool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        Self {
            schema: ToolSchema::new(name, description, input_schema),
            handler: Arc::new(move |input| Box::pin(handler(input))),
        }
    }

    pub async fn execute(&self, input: ToolInput) -> anyhow::Result<String> {
        (self.handler)(input).await
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &ToolSchema {
        &self.schema
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool").field("schema", &self.schema).finish()
    }
}

/// Name-dispatching executor over a set of [`Tool`]s.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tool, replacing any earlier tool with the same name.
    pub fn with(mut self, tool: Tool) -> Self {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Declarations for every registered tool, in registration order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|t| t.schema().clone()).collect()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, name: &str, input: ToolInput) -> anyhow::Result<String> {
        match self.get(name) {
            Some(tool) => tool.execute(input).await,
            None => Err(anyhow::anyhow!("Unknown tool: {}", name)),
        }
    }
}

/// Normalises an input schema into a JSON Schema object.
///
/// Accepted forms:
/// - full schema (`type` + `properties`): passed through unchanged
/// - simple notation: `{"param": "string"}`, every param required
/// - extended notation: `{"param": {"type": "integer", "optional": true}}`,
///   where `optional`, `required` and `default` decide membership of the
///   `required` array
fn normalize_schema(schema: Value) -> Value {
    let Some(obj) = schema.as_object() else {
        return serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        });
    };

    if obj.contains_key("type") && obj.contains_key("properties") {
        return schema;
    }

    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for (param_name, param_type) in obj {
        if let Some(type_str) = param_type.as_str() {
            properties.insert(param_name.clone(), type_to_json_schema(type_str));
            required.push(param_name.clone());
        } else if let Some(prop_obj) = param_type.as_object() {
            let mut prop_obj = prop_obj.clone();

            // Not JSON Schema keywords; strip before declaring.
            let is_optional = prop_obj
                .remove("optional")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let is_required = prop_obj.remove("required").and_then(|v| v.as_bool());
            let has_default = prop_obj.contains_key("default");

            properties.insert(param_name.clone(), Value::Object(prop_obj));

            match is_required {
                Some(true) => required.push(param_name.clone()),
                Some(false) => {}
                None if is_optional || has_default => {}
                None => required.push(param_name.clone()),
            }
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

fn type_to_json_schema(type_str: &str) -> Value {
    let json_type = match type_str {
        "string" | "str" => "string",
        "integer" | "int" | "i32" | "i64" | "u32" | "u64" => "integer",
        "number" | "float" | "f32" | "f64" => "number",
        "boolean" | "bool" => "boolean",
        "array" | "list" | "vec" => "array",
        "object" | "dict" | "map" => "object",
        // Unknown names fall back to string
        _ => "string",
    };

    serde_json::json!({ "type": json_type })
}

/// Builder for closure-backed [`Tool`]s.
pub struct ToolBuilder {
    name: String,
    description: String,
    schema: Value,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: serde_json::json!({}),
        }
    }

    /// Replaces the schema entirely.
    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    /// Adds a required parameter in simple notation.
    pub fn param(mut self, name: &str, type_str: &str) -> Self {
        if !self.schema.is_object() {
            self.schema = serde_json::json!({});
        }
        if let Some(obj) = self.schema.as_object_mut() {
            obj.insert(name.to_string(), Value::String(type_str.to_string()));
        }
        self
    }

    pub fn build<F, Fut>(self, handler: F) -> Tool
    where
        F: Fn(ToolInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        Tool::new(self.name, self.description, self.schema, handler)
    }
}

/// Starts a [`ToolBuilder`].
pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder::new(name, description)
}
