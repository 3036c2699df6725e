//! Per-session conversation history
//!
//! Keeps the system prompt and the rolling user/assistant exchange handed to
//! the language model each turn. When the user barges in, only the prefix of
//! the reply they actually heard is recorded, followed by an interruption
//! marker, so the model knows its last reply was cut off.

use serde::Serialize;

/// Role of a message in the conversation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant reply
    Assistant,
}

/// A single message in the conversation
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// Role of the message sender
    pub role: ChatRole,
    /// Message content
    pub content: String,
}

impl ChatMessage {
    /// Create a new message
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

/// Rolling conversation history with a fixed system prompt
#[derive(Clone, Debug)]
pub struct ConversationHistory {
    system_prompt: String,
    messages: Vec<ChatMessage>,
}

impl ConversationHistory {
    /// Create a history with the given system prompt
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages: Vec::new(),
        }
    }

    /// Record a user message
    pub fn add_user(&mut self, content: &str) {
        self.messages.push(ChatMessage::user(content));
    }

    /// Record a completed assistant reply
    pub fn add_assistant(&mut self, content: &str) {
        self.messages.push(ChatMessage::assistant(content));
    }

    /// Record an interrupted assistant reply
    ///
    /// `heard` is the part of the reply that reached playback before the
    /// barge-in; the interruption marker replaces the unsaid remainder.
    pub fn interrupted(&mut self, heard: &str) {
        if !heard.is_empty() {
            self.messages.push(ChatMessage::assistant(heard));
        }
        self.messages
            .push(ChatMessage::system("[Interrupted by user]"));
    }

    /// Clear the exchange, keeping the system prompt
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// All messages including the leading system prompt
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut result = Vec::with_capacity(self.messages.len() + 1);
        result.push(ChatMessage::system(&self.system_prompt));
        result.extend(self.messages.iter().cloned());
        result
    }

    /// Number of exchange messages (excluding the system prompt)
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if the exchange is empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
