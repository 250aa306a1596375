//! Chat history for the single active conversation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the model.
    System,
    /// What the user said.
    User,
    /// What the assistant answered.
    Assistant,
}

impl Role {
    /// Wire name used by chat completion APIs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author.
    pub role: Role,
    /// Exact text.
    pub content: String,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Append-only chat history plus per-session flags.
///
/// Messages are never reordered or edited; [`reset`](Self::reset) is the
/// only way to shrink the history.
#[derive(Debug, Clone)]
pub struct ConversationState {
    system_prompt: String,
    messages: Vec<ChatMessage>,
    exit_requested: bool,
    last_prompt_length: usize,
}

impl ConversationState {
    /// Start a conversation with the given system prompt.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        let system_prompt = system_prompt.into();
        Self {
            messages: vec![ChatMessage::system(system_prompt.clone())],
            system_prompt,
            exit_requested: false,
            last_prompt_length: 0,
        }
    }

    /// Append a user message.
    pub fn push_user(&mut self, content: impl Into<String>) {
        let content = content.into();
        self.last_prompt_length = content.chars().count();
        self.messages.push(ChatMessage::user(content));
    }

    /// Append an assistant message.
    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::assistant(content));
    }

    /// Full history in insertion order.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of messages including the system prompt.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether only the system prompt is present.
    pub fn is_empty(&self) -> bool {
        self.messages.len() <= 1
    }

    /// Character count of the most recent user message.
    pub fn last_prompt_length(&self) -> usize {
        self.last_prompt_length
    }

    /// Mark the session as ending.
    pub fn request_exit(&mut self) {
        self.exit_requested = true;
    }

    /// Whether the user asked to end the session.
    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    /// Human-readable transcript of everything after the system prompt.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Drop everything except the initial system message.
    pub fn reset(&mut self) {
        self.messages = vec![ChatMessage::system(self.system_prompt.clone())];
        self.exit_requested = false;
        self.last_prompt_length = 0;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn starts_with_system_prompt() {
        let conv = ConversationState::new("Sei nett.");
        assert_eq!(conv.messages(), &[ChatMessage::system("Sei nett.")]);
        assert!(conv.is_empty());
    }

    #[test]
    fn appends_preserve_order_and_content() {
        let mut conv = ConversationState::new("sys");
        conv.push_user("Wie spät ist es?");
        conv.push_assistant("Es ist  zwölf Uhr.\n");
        let roles: Vec<Role> = conv.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(conv.messages()[1].content, "Wie spät ist es?");
        assert_eq!(conv.messages()[2].content, "Es ist  zwölf Uhr.\n");
        assert_eq!(conv.last_prompt_length(), 16);
    }

    #[test]
    fn reset_keeps_only_system_prompt() {
        let mut conv = ConversationState::new("sys");
        conv.push_user("hallo du da");
        conv.request_exit();
        conv.reset();
        assert_eq!(conv.len(), 1);
        assert!(!conv.exit_requested());
        assert_eq!(conv.last_prompt_length(), 0);
    }

    #[test]
    fn transcript_skips_system_prompt() {
        let mut conv = ConversationState::new("sys");
        conv.push_user("Hallo");
        conv.push_assistant("Hi!");
        assert_eq!(conv.transcript(), "user: Hallo\nassistant: Hi!");
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::user("x")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"x"}"#);
    }
}
