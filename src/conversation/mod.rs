//! Conversation types and state management

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix placed on a bot message whose turn failed.
pub const ERROR_PREFIX: &str = "Error: ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// True only while a bot message is waiting for its first token.
    #[serde(default)]
    pub loading: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            loading: false,
        }
    }

    /// Placeholder bot message shown until the first delta arrives.
    pub fn pending_bot() -> Self {
        Self {
            role: Role::Bot,
            content: String::new(),
            loading: true,
        }
    }

    pub fn bot(content: impl Into<String>) -> Self {
        Self {
            role: Role::Bot,
            content: content.into(),
            loading: false,
        }
    }

    pub fn error(reason: impl std::fmt::Display) -> Self {
        Self::bot(format!("{}{}", ERROR_PREFIX, reason))
    }

    pub fn is_error(&self) -> bool {
        self.role == Role::Bot && self.content.starts_with(ERROR_PREFIX)
    }
}

/// A stored chat: identity, display name and ordered messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    /// Empty until derived from the first exchange.
    #[serde(default)]
    pub name: String,
    pub messages: Vec<Message>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            messages: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Display label: the derived name, or the id while unnamed.
    pub fn title(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// The trailing message, if it is a bot message still waiting for tokens.
    pub fn pending(&self) -> Option<&Message> {
        self.messages
            .last()
            .filter(|m| m.role == Role::Bot && m.loading)
    }

    /// Replace the trailing message in place.
    pub fn replace_last(&mut self, message: Message) {
        match self.messages.last_mut() {
            Some(last) => *last = message,
            None => self.messages.push(message),
        }
    }
}

impl Default for Chat {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi","loading":false}"#);

        let parsed: Message = serde_json::from_str(r#"{"role":"bot","content":"yo"}"#).unwrap();
        assert_eq!(parsed.role, Role::Bot);
        assert!(!parsed.loading);
    }

    #[test]
    fn test_replace_last() {
        let mut chat = Chat::with_id("c1");
        chat.messages.push(Message::user("hello"));
        chat.messages.push(Message::pending_bot());
        assert!(chat.pending().is_some());

        chat.replace_last(Message::bot("world"));
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0], Message::user("hello"));
        assert!(chat.pending().is_none());
    }

    #[test]
    fn test_error_message() {
        let msg = Message::error("connection refused");
        assert!(msg.is_error());
        assert!(!msg.loading);
        assert_eq!(msg.content, "Error: connection refused");
    }

    #[test]
    fn test_title_falls_back_to_id() {
        let mut chat = Chat::with_id("abc");
        assert_eq!(chat.title(), "abc");
        chat.name = "Borscht Banter".into();
        assert_eq!(chat.title(), "Borscht Banter");
    }
}
