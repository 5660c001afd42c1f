use lawgpt_chat::Message;
use serde::{Deserialize, Serialize};

use super::ids::ChatId;

/// Storage key holding the saved-conversation list, newest first.
pub const CHAT_HISTORY_KEY: &str = "lawgpt-chat-history";
/// Storage key holding the auto-saved conversation.
pub const AUTO_SAVE_KEY: &str = "lawgpt-chat-auto-save";
pub const MAX_HISTORY_ENTRIES: usize = 50;

pub const GENERAL_LEGAL_CATEGORY: &str = "General Legal";
pub const NO_RESPONSE_PREVIEW: &str = "No response yet";
pub const DUPLICATED_TAG: &str = "duplicated";
pub const AUTO_SAVED_TAG: &str = "auto-saved";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Complex => "complex",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPreview {
    pub first_question: String,
    pub first_response: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMetadata {
    pub complexity: Complexity,
    /// User rating in `1..=5`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satisfaction: Option<u8>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One saved conversation with its derived summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryEntry {
    pub id: ChatId,
    pub name: String,
    pub messages: Vec<Message>,
    /// Unix milliseconds at save time.
    pub timestamp: u64,
    pub category: String,
    /// Whole minutes between conversation start and save.
    pub duration: u64,
    pub message_count: usize,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub is_starred: bool,
    #[serde(default)]
    pub is_archived: bool,
    pub preview: ChatPreview,
    pub metadata: ChatMetadata,
}

/// Selection over saved conversations. The default matches every
/// non-archived entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HistoryFilter {
    /// Case-insensitive text matched against name and preview.
    pub query: Option<String>,
    pub category: Option<String>,
    pub include_archived: bool,
}

impl HistoryFilter {
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn including_archived(mut self) -> Self {
        self.include_archived = true;
        self
    }

    pub fn matches(&self, entry: &ChatHistoryEntry) -> bool {
        if entry.is_archived && !self.include_archived {
            return false;
        }
        if let Some(category) = &self.category
            && !entry.category.eq_ignore_ascii_case(category)
        {
            return false;
        }

        match self.query.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(query) => {
                let needle = query.to_lowercase();
                [
                    &entry.name,
                    &entry.preview.first_question,
                    &entry.preview.first_response,
                ]
                .into_iter()
                .any(|text| text.to_lowercase().contains(&needle))
            }
        }
    }
}
