//! Host-supplied context prepended to outgoing user messages.
//!
//! The editor knows things the model should see on every message (the
//! warrior currently open, the last battle) without the user retyping them.
//! The context is rendered as `[Context]` lines ahead of the message text,
//! one per field that is set, followed by a blank line and
//! `User message: {text}`. The warrior code is wrapped in a `redcode` fence.

/// Optional per-session context injected into each user message.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PromptContext {
    /// Game API key the model may use in `curl` commands.
    pub api_key: Option<String>,
    /// Redcode source currently open in the editor.
    pub warrior_code: Option<String>,
    /// Free-form summary of the most recent battle.
    pub recent_battle: Option<String>,
}

impl std::fmt::Debug for PromptContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptContext")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("warrior_code", &self.warrior_code)
            .field("recent_battle", &self.recent_battle)
            .finish()
    }
}

impl PromptContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_warrior_code(mut self, code: impl Into<String>) -> Self {
        self.warrior_code = Some(code.into());
        self
    }

    pub fn with_recent_battle(mut self, summary: impl Into<String>) -> Self {
        self.recent_battle = Some(summary.into());
        self
    }

    /// Renders the `[Context]` lines, or `None` when nothing is set.
    ///
    /// Empty strings count as unset.
    pub fn render(&self) -> Option<String> {
        let mut parts = Vec::new();

        if let Some(key) = non_empty(&self.api_key) {
            parts.push(format!("[Context] API Key for curl requests: {}", key));
        }
        if let Some(code) = non_empty(&self.warrior_code) {
            parts.push(format!(
                "[Context] Current warrior code in editor:\n```redcode\n{}\n```",
                code
            ));
        }
        if let Some(battle) = non_empty(&self.recent_battle) {
            parts.push(format!("[Context] {}", battle));
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }

    /// The text actually sent for a user message.
    pub fn apply(&self, text: &str) -> String {
        match self.render() {
            Some(context) => format!("{}\n\nUser message: {}", context, text),
            None => text.to_string(),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}
