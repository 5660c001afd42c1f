use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageId, MessagePatch};

/// Reachability of the backend as last observed by a health check or a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiStatus {
    Connected,
    Disconnected,
    Connecting,
}

impl ApiStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Connected => "Online",
            Self::Disconnected => "Offline",
            Self::Connecting => "Connecting...",
        }
    }
}

impl fmt::Display for ApiStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.label())
    }
}

/// The fixed action vocabulary accepted by [`ChatState::reduce`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatAction {
    AddMessage(Message),
    SetLoading(bool),
    /// Also forces `is_loading` off.
    SetError(Option<String>),
    SetApiStatus(ApiStatus),
    /// Merges into the message at the highest index only.
    UpdateLastMessage(MessagePatch),
    /// Merges into the message with the given id, wherever it sits.
    UpdateMessage {
        id: MessageId,
        patch: MessagePatch,
    },
    ClearMessages,
    LoadMessages(Vec<Message>),
}

/// Snapshot of one open chat session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatState {
    /// Insertion order is display order.
    pub messages: Vec<Message>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub api_status: ApiStatus,
}

impl Default for ChatState {
    fn default() -> Self {
        Self::initial()
    }
}

impl ChatState {
    /// A fresh session: the welcome message only, backend not checked yet.
    pub fn initial() -> Self {
        Self {
            messages: vec![Message::welcome()],
            is_loading: false,
            error: None,
            api_status: ApiStatus::Connecting,
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| &message.id == id)
    }

    pub fn loading_message_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|message| message.is_loading())
            .count()
    }

    /// Applies one action and returns the next state; `self` is never touched.
    pub fn reduce(&self, action: ChatAction) -> Self {
        match action {
            ChatAction::AddMessage(message) => {
                let mut next = self.clone();
                next.messages.push(message);
                next
            }
            ChatAction::SetLoading(is_loading) => Self {
                is_loading,
                ..self.clone()
            },
            ChatAction::SetError(error) => Self {
                error,
                is_loading: false,
                ..self.clone()
            },
            ChatAction::SetApiStatus(api_status) => Self {
                api_status,
                ..self.clone()
            },
            ChatAction::UpdateLastMessage(patch) => {
                let last_index = self.messages.len().checked_sub(1);
                self.with_messages_patched(&patch, |index, _| Some(index) == last_index)
            }
            ChatAction::UpdateMessage { id, patch } => {
                if self.message(&id).is_none() {
                    tracing::debug!(message_id = %id, "update targets unknown message; ignoring");
                }
                self.with_messages_patched(&patch, |_, message| message.id == id)
            }
            ChatAction::ClearMessages => self.with_messages(vec![Message::welcome()]),
            ChatAction::LoadMessages(messages) => self.with_messages(messages),
        }
    }

    fn with_messages_patched(
        &self,
        patch: &MessagePatch,
        is_target: impl Fn(usize, &Message) -> bool,
    ) -> Self {
        let messages = self
            .messages
            .iter()
            .enumerate()
            .map(|(index, message)| {
                if is_target(index, message) {
                    message.merged(patch)
                } else {
                    message.clone()
                }
            })
            .collect();

        self.with_messages(messages)
    }

    fn with_messages(&self, messages: Vec<Message>) -> Self {
        Self {
            messages,
            is_loading: self.is_loading,
            error: self.error.clone(),
            api_status: self.api_status,
        }
    }
}
