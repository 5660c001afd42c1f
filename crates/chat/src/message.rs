use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed identifier of the greeting that opens every fresh conversation.
pub const WELCOME_MESSAGE_ID: &str = "welcome";

pub const WELCOME_MESSAGE_CONTENT: &str = "⚖️ Welcome to **Law GPT** - Your Advanced AI Legal Assistant!\n\n\
I'm here to help you navigate the complex world of Indian law with:\n\n\
🔍 **Legal Research & Analysis**\n\
📚 **Case Law References**\n\
📋 **Document Review**\n\
⚖️ **Legal Procedure Guidance**\n\
🏛️ **Constitutional Matters**\n\n\
How can I assist you with your legal inquiry today?";

pub const WELCOME_MESSAGE_SOURCES: [&str; 3] = [
    "Legal Knowledge Base",
    "Indian Case Law Database",
    "Legal Statutes",
];

/// Stable identifier for one message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Mints a time-ordered identifier for a freshly created message.
    pub fn new_v7() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One entry of the chat transcript.
///
/// Content grows while an answer streams in and is replaced wholesale once the
/// answer completes or falls back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    /// Unix milliseconds.
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_loading: Option<bool>,
}

impl Message {
    pub fn new(id: MessageId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            timestamp: current_unix_timestamp_millis(),
            sources: None,
            is_loading: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageId::new_v7(), Role::User, content)
    }

    /// Creates the empty assistant placeholder shown while a request is in flight.
    pub fn assistant_placeholder() -> Self {
        let mut message = Self::new(MessageId::new_v7(), Role::Assistant, String::new());
        message.is_loading = Some(true);
        message
    }

    pub fn welcome() -> Self {
        let mut message = Self::new(
            MessageId::new(WELCOME_MESSAGE_ID),
            Role::Assistant,
            WELCOME_MESSAGE_CONTENT,
        );
        message.sources = Some(
            WELCOME_MESSAGE_SOURCES
                .iter()
                .map(|source| source.to_string())
                .collect(),
        );
        message
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading.unwrap_or(false)
    }

    pub fn is_welcome(&self) -> bool {
        self.id.as_str() == WELCOME_MESSAGE_ID
    }

    /// Returns a copy with every field present in `patch` overwritten.
    pub fn merged(&self, patch: &MessagePatch) -> Self {
        let mut next = self.clone();
        if let Some(content) = &patch.content {
            next.content = content.clone();
        }
        if let Some(sources) = &patch.sources {
            next.sources = Some(sources.clone());
        }
        if let Some(is_loading) = patch.is_loading {
            next.is_loading = Some(is_loading);
        }
        next
    }
}

/// Partial message update; absent fields leave the target untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub sources: Option<Vec<String>>,
    pub is_loading: Option<bool>,
}

impl MessagePatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn with_loading(mut self, is_loading: bool) -> Self {
        self.is_loading = Some(is_loading);
        self
    }

    /// Terminal update: final content and sources, loading cleared.
    pub fn finished(content: impl Into<String>, sources: Vec<String>) -> Self {
        Self::content(content)
            .with_sources(sources)
            .with_loading(false)
    }
}

pub fn current_unix_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_only_overwrites_present_fields() {
        let original = Message::user("question").with_sources(vec!["a".to_string()]);
        let merged = original.merged(&MessagePatch::default().with_loading(true));

        assert_eq!(merged.content, "question");
        assert_eq!(merged.sources, Some(vec!["a".to_string()]));
        assert!(merged.is_loading());
        assert!(!original.is_loading());
    }

    #[test]
    fn message_serializes_with_camel_case_and_skips_absent_fields() {
        let mut message = Message::new(MessageId::new("42"), Role::User, "hello");
        message.timestamp = 7;
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "id": "42",
                "role": "user",
                "content": "hello",
                "timestamp": 7
            })
        );

        let placeholder = Message::assistant_placeholder();
        let json = serde_json::to_value(&placeholder).unwrap();
        assert_eq!(json["isLoading"], serde_json::json!(true));
    }

    #[test]
    fn welcome_message_carries_fixed_identity_and_sources() {
        let welcome = Message::welcome();

        assert!(welcome.is_welcome());
        assert_eq!(welcome.role, Role::Assistant);
        assert_eq!(welcome.sources.as_ref().map(Vec::len), Some(3));
        assert!(!welcome.is_loading());
    }
}
