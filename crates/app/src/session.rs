use std::path::{Path, PathBuf};
use std::sync::Arc;

use lawgpt_backend::{ChatBackend, SendOutcome, check_connection, send_message};
use lawgpt_chat::{
    ApiStatus, ChatAction, ChatStore, Role, current_unix_timestamp_millis,
};
use lawgpt_storage::{
    ChatHistoryEntry, ChatId, HistoryFilter, HistoryStore, StorageError, export_file_name,
    export_text,
};
use snafu::{OptionExt, ResultExt, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("history operation failed on `{stage}`: {source}"))]
    History {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("no listed conversation #{index}; run /history first"))]
    UnknownIndex { stage: &'static str, index: usize },
    #[snafu(display("failed to write export to {path:?} on `{stage}`: {source}"))]
    WriteExport {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Result of [`ChatSession::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSend {
    /// A previous answer is still in flight; the query was dropped.
    Busy,
    Completed(SendOutcome),
}

/// One interactive conversation plus its saved history.
///
/// History commands address entries by their 1-based position in the most
/// recent listing.
pub struct ChatSession {
    store: ChatStore,
    backend: Arc<dyn ChatBackend>,
    history: HistoryStore,
    started_at: u64,
    listing: Vec<ChatId>,
}

impl ChatSession {
    pub fn new(store: ChatStore, backend: Arc<dyn ChatBackend>, history: HistoryStore) -> Self {
        Self {
            store,
            backend,
            history,
            started_at: current_unix_timestamp_millis(),
            listing: Vec::new(),
        }
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    pub fn endpoint(&self) -> &str {
        self.backend.endpoint()
    }

    /// Routes later sends and health checks to `backend`. An answer in flight keeps
    /// the backend it started with.
    pub fn set_backend(&mut self, backend: Arc<dyn ChatBackend>) {
        tracing::info!(endpoint = %backend.endpoint(), "switched backend");
        self.backend = backend;
    }

    pub async fn check_connection(&self) -> ApiStatus {
        check_connection(&self.store, self.backend.as_ref()).await
    }

    /// Sends one query, then refreshes the auto-save slot.
    pub async fn send(&mut self, query: &str) -> SessionSend {
        if self.store.snapshot().is_loading {
            tracing::debug!("send ignored while an answer is in flight");
            return SessionSend::Busy;
        }

        let outcome = send_message(&self.store, self.backend.as_ref(), query).await;
        if outcome != SendOutcome::Rejected {
            self.auto_save();
        }
        SessionSend::Completed(outcome)
    }

    /// Reloads the auto-saved conversation; `Ok(false)` when there is none.
    pub fn restore_auto_save(&mut self) -> SessionResult<bool> {
        let Some(entry) = self
            .history
            .restore_auto_save()
            .context(HistorySnafu {
                stage: "restore-auto-save",
            })?
        else {
            return Ok(false);
        };

        tracing::info!(message_count = entry.messages.len(), "restored auto-saved conversation");
        self.started_at = entry.timestamp;
        self.store.dispatch(ChatAction::LoadMessages(entry.messages));
        Ok(true)
    }

    pub fn archive_older_than(&self, days: u64) -> SessionResult<usize> {
        self.history
            .archive_older_than(days, current_unix_timestamp_millis())
            .context(HistorySnafu {
                stage: "archive-old-conversations",
            })
    }

    /// Starts over. A conversation with at least one question is saved to
    /// history first and returned.
    pub fn new_chat(&mut self) -> SessionResult<Option<ChatHistoryEntry>> {
        let has_question = self
            .store
            .snapshot()
            .messages
            .iter()
            .any(|message| message.role == Role::User);
        let saved = if has_question {
            Some(self.save()?)
        } else {
            None
        };

        self.store.dispatch(ChatAction::ClearMessages);
        self.started_at = current_unix_timestamp_millis();
        self.history.clear_auto_save().context(HistorySnafu {
            stage: "new-chat-clear-auto-save",
        })?;
        Ok(saved)
    }

    pub fn save(&self) -> SessionResult<ChatHistoryEntry> {
        let snapshot = self.store.snapshot();
        self.history
            .save_session(&snapshot.messages, self.started_at)
            .context(HistorySnafu {
                stage: "save-conversation",
            })
    }

    /// Lists saved conversations and remembers their order for later commands.
    pub fn history(&mut self, filter: &HistoryFilter) -> SessionResult<Vec<ChatHistoryEntry>> {
        let entries = self.history.find(filter).context(HistorySnafu {
            stage: "list-history",
        })?;
        self.listing = entries.iter().map(|entry| entry.id.clone()).collect();
        Ok(entries)
    }

    pub fn load(&mut self, index: usize) -> SessionResult<ChatHistoryEntry> {
        let entry = self.listed_entry(index)?;
        self.store
            .dispatch(ChatAction::LoadMessages(entry.messages.clone()));
        self.started_at = current_unix_timestamp_millis();
        tracing::info!(chat_id = %entry.id, "loaded conversation from history");
        Ok(entry)
    }

    pub fn toggle_star(&self, index: usize) -> SessionResult<ChatHistoryEntry> {
        let id = self.listed_id(index)?;
        self.history.toggle_star(id).context(HistorySnafu {
            stage: "toggle-star",
        })
    }

    pub fn toggle_pin(&self, index: usize) -> SessionResult<ChatHistoryEntry> {
        let id = self.listed_id(index)?;
        self.history.toggle_pin(id).context(HistorySnafu {
            stage: "toggle-pin",
        })
    }

    pub fn delete(&mut self, index: usize) -> SessionResult<ChatId> {
        let id = self.listed_id(index)?.clone();
        self.history.delete(&id).context(HistorySnafu {
            stage: "delete-conversation",
        })?;
        // Positions shift after a delete; force a fresh listing.
        self.listing.clear();
        Ok(id)
    }

    pub fn rename(&self, index: usize, name: &str) -> SessionResult<ChatHistoryEntry> {
        let id = self.listed_id(index)?;
        self.history.rename(id, name).context(HistorySnafu {
            stage: "rename-conversation",
        })
    }

    pub fn rate(&self, index: usize, rating: u8) -> SessionResult<ChatHistoryEntry> {
        let id = self.listed_id(index)?;
        self.history.rate(id, rating).context(HistorySnafu {
            stage: "rate-conversation",
        })
    }

    pub fn duplicate(&mut self, index: usize) -> SessionResult<ChatHistoryEntry> {
        let id = self.listed_id(index)?.clone();
        let copy = self.history.duplicate(&id).context(HistorySnafu {
            stage: "duplicate-conversation",
        })?;
        self.listing.clear();
        Ok(copy)
    }

    /// Removes every saved conversation. The auto-save slot is kept.
    pub fn clear_history(&mut self) -> SessionResult<()> {
        self.history.clear().context(HistorySnafu {
            stage: "clear-history",
        })?;
        self.listing.clear();
        Ok(())
    }

    /// Writes a plain-text transcript into `directory` and returns its path.
    pub fn export(&self, index: usize, directory: &Path) -> SessionResult<PathBuf> {
        let entry = self.listed_entry(index)?;
        let path = directory.join(export_file_name(&entry));
        std::fs::write(&path, export_text(&entry)).context(WriteExportSnafu {
            stage: "write-export",
            path: path.clone(),
        })?;
        Ok(path)
    }

    fn auto_save(&self) {
        let snapshot = self.store.snapshot();
        if let Err(error) = self.history.auto_save(&snapshot.messages, self.started_at) {
            tracing::warn!(error = %error, "auto-save failed");
        }
    }

    fn listed_id(&self, index: usize) -> SessionResult<&ChatId> {
        index
            .checked_sub(1)
            .and_then(|position| self.listing.get(position))
            .context(UnknownIndexSnafu {
                stage: "resolve-history-index",
                index,
            })
    }

    fn listed_entry(&self, index: usize) -> SessionResult<ChatHistoryEntry> {
        let id = self.listed_id(index)?;
        self.history.get(id).context(HistorySnafu {
            stage: "get-listed-conversation",
        })
    }
}
