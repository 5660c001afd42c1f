use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed id of the single auto-saved conversation.
pub const AUTO_SAVE_CHAT_ID: &str = "auto-save";

/// Identifier of a saved conversation.
///
/// Generated ids are UUIDv7 text so they sort by creation time; the auto-save
/// slot uses [`AUTO_SAVE_CHAT_ID`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn new_v7() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn auto_save() -> Self {
        Self::new(AUTO_SAVE_CHAT_ID)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
