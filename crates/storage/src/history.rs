use std::sync::Arc;

use lawgpt_chat::{Message, current_unix_timestamp_millis};
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::{OptionExt, ResultExt, ensure};

use crate::KeyValueStore;
use crate::error::{
    DeserializeJsonSnafu, InvalidRatingSnafu, NoUserMessageSnafu, NotFoundSnafu,
    SerializeJsonSnafu, StorageResult,
};
use crate::ids::ChatId;
use crate::topic::{
    categorize_legal_topic, chat_name, complexity_of, first_assistant_reply, first_user_message,
    question_preview, response_preview, topic_tag,
};
use crate::types::{
    AUTO_SAVE_KEY, AUTO_SAVED_TAG, CHAT_HISTORY_KEY, ChatHistoryEntry, ChatMetadata, ChatPreview,
    DUPLICATED_TAG, HistoryFilter, MAX_HISTORY_ENTRIES,
};

const HISTORY_ENTITY: &str = "chat-history";
const MILLIS_PER_MINUTE: u64 = 60_000;
const MILLIS_PER_DAY: u64 = 86_400_000;

/// Saved conversations kept as JSON documents in a [`KeyValueStore`].
#[derive(Clone)]
pub struct HistoryStore {
    kv: Arc<dyn KeyValueStore>,
}

impl HistoryStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Every saved conversation in stored order, newest save first.
    pub fn list(&self) -> StorageResult<Vec<ChatHistoryEntry>> {
        Ok(self.read_json(CHAT_HISTORY_KEY)?.unwrap_or_default())
    }

    /// Matching conversations, pinned first, then starred, then newest.
    pub fn find(&self, filter: &HistoryFilter) -> StorageResult<Vec<ChatHistoryEntry>> {
        let mut entries = self
            .list()?
            .into_iter()
            .filter(|entry| filter.matches(entry))
            .collect::<Vec<_>>();
        entries.sort_by(|left, right| {
            right
                .is_pinned
                .cmp(&left.is_pinned)
                .then(right.is_starred.cmp(&left.is_starred))
                .then(right.timestamp.cmp(&left.timestamp))
        });
        Ok(entries)
    }

    pub fn get(&self, id: &ChatId) -> StorageResult<ChatHistoryEntry> {
        self.list()?
            .into_iter()
            .find(|entry| &entry.id == id)
            .context(NotFoundSnafu {
                stage: "get-history-entry",
                entity: HISTORY_ENTITY,
                id: id.to_string(),
            })
    }

    pub fn save_session(
        &self,
        messages: &[Message],
        started_at: u64,
    ) -> StorageResult<ChatHistoryEntry> {
        self.save_session_at(messages, started_at, current_unix_timestamp_millis())
    }

    pub fn save_session_at(
        &self,
        messages: &[Message],
        started_at: u64,
        now: u64,
    ) -> StorageResult<ChatHistoryEntry> {
        let entry = summarize(ChatId::new_v7(), messages, started_at, now).context(
            NoUserMessageSnafu {
                stage: "save-session",
            },
        )?;
        self.prepend(entry.clone())?;

        tracing::info!(
            chat_id = %entry.id,
            name = %entry.name,
            message_count = entry.message_count,
            "saved conversation to history"
        );
        Ok(entry)
    }

    pub fn rename(&self, id: &ChatId, name: &str) -> StorageResult<ChatHistoryEntry> {
        self.update_entry(id, "rename-history-entry", |entry| {
            entry.name = name.trim().to_string();
        })
    }

    pub fn toggle_star(&self, id: &ChatId) -> StorageResult<ChatHistoryEntry> {
        self.update_entry(id, "toggle-history-star", |entry| {
            entry.is_starred = !entry.is_starred;
        })
    }

    pub fn toggle_pin(&self, id: &ChatId) -> StorageResult<ChatHistoryEntry> {
        self.update_entry(id, "toggle-history-pin", |entry| {
            entry.is_pinned = !entry.is_pinned;
        })
    }

    pub fn rate(&self, id: &ChatId, rating: u8) -> StorageResult<ChatHistoryEntry> {
        ensure!(
            (1..=5).contains(&rating),
            InvalidRatingSnafu {
                stage: "rate-history-entry",
                rating,
            }
        );
        self.update_entry(id, "rate-history-entry", |entry| {
            entry.metadata.satisfaction = Some(rating);
        })
    }

    pub fn delete(&self, id: &ChatId) -> StorageResult<()> {
        let mut entries = self.list()?;
        let before = entries.len();
        entries.retain(|entry| &entry.id != id);
        ensure!(
            entries.len() != before,
            NotFoundSnafu {
                stage: "delete-history-entry",
                entity: HISTORY_ENTITY,
                id: id.to_string(),
            }
        );
        self.write_json(CHAT_HISTORY_KEY, &entries)
    }

    /// Copies an entry under a fresh id at the head of the list.
    pub fn duplicate(&self, id: &ChatId) -> StorageResult<ChatHistoryEntry> {
        let source = self.get(id)?;
        let mut copy = ChatHistoryEntry {
            id: ChatId::new_v7(),
            name: format!("{} (Copy)", source.name),
            timestamp: current_unix_timestamp_millis(),
            ..source
        };
        copy.metadata.tags.push(DUPLICATED_TAG.to_string());

        self.prepend(copy.clone())?;
        Ok(copy)
    }

    /// Archives entries saved more than `days` days before `now`; returns how
    /// many changed.
    pub fn archive_older_than(&self, days: u64, now: u64) -> StorageResult<usize> {
        let cutoff = now.saturating_sub(days.saturating_mul(MILLIS_PER_DAY));
        let mut entries = self.list()?;
        let mut archived = 0;
        for entry in entries
            .iter_mut()
            .filter(|entry| !entry.is_archived && entry.timestamp < cutoff)
        {
            entry.is_archived = true;
            archived += 1;
        }

        if archived > 0 {
            self.write_json(CHAT_HISTORY_KEY, &entries)?;
            tracing::info!(archived, days, "archived old conversations");
        }
        Ok(archived)
    }

    pub fn clear(&self) -> StorageResult<()> {
        self.kv.remove(CHAT_HISTORY_KEY)
    }

    /// Overwrites the auto-save slot. Conversations without a user message are
    /// not worth restoring, so they leave the slot untouched.
    pub fn auto_save(
        &self,
        messages: &[Message],
        started_at: u64,
    ) -> StorageResult<Option<ChatHistoryEntry>> {
        let now = current_unix_timestamp_millis();
        let Some(mut entry) = summarize(ChatId::auto_save(), messages, started_at, now) else {
            return Ok(None);
        };
        entry.name = format!("{} (Auto-saved)", entry.name);
        entry.metadata.tags.push(AUTO_SAVED_TAG.to_string());

        self.write_json(AUTO_SAVE_KEY, &entry)?;
        tracing::debug!(message_count = entry.message_count, "auto-saved conversation");
        Ok(Some(entry))
    }

    /// The auto-saved conversation, when it holds more than the greeting.
    pub fn restore_auto_save(&self) -> StorageResult<Option<ChatHistoryEntry>> {
        let entry = self.read_json::<ChatHistoryEntry>(AUTO_SAVE_KEY)?;
        Ok(entry.filter(|entry| entry.messages.len() > 1))
    }

    pub fn clear_auto_save(&self) -> StorageResult<()> {
        self.kv.remove(AUTO_SAVE_KEY)
    }

    fn prepend(&self, entry: ChatHistoryEntry) -> StorageResult<()> {
        let mut entries = self.list()?;
        entries.insert(0, entry);
        entries.truncate(MAX_HISTORY_ENTRIES);
        self.write_json(CHAT_HISTORY_KEY, &entries)
    }

    fn update_entry<F>(
        &self,
        id: &ChatId,
        stage: &'static str,
        apply: F,
    ) -> StorageResult<ChatHistoryEntry>
    where
        F: FnOnce(&mut ChatHistoryEntry),
    {
        let mut entries = self.list()?;
        let entry = entries
            .iter_mut()
            .find(|entry| &entry.id == id)
            .context(NotFoundSnafu {
                stage,
                entity: HISTORY_ENTITY,
                id: id.to_string(),
            })?;
        apply(entry);
        let updated = entry.clone();

        self.write_json(CHAT_HISTORY_KEY, &entries)?;
        Ok(updated)
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        let Some(raw) = self.kv.get(key)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .context(DeserializeJsonSnafu {
                stage: "decode-stored-json",
                key: key.to_string(),
            })
    }

    fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let raw = serde_json::to_string(value).context(SerializeJsonSnafu {
            stage: "encode-stored-json",
        })?;
        self.kv.set(key, &raw)
    }
}

/// Builds the stored summary of a conversation; `None` without a user message.
fn summarize(
    id: ChatId,
    messages: &[Message],
    started_at: u64,
    now: u64,
) -> Option<ChatHistoryEntry> {
    let question = first_user_message(messages)?.content.as_str();
    let reply = first_assistant_reply(messages).map(|message| message.content.as_str());
    let category = categorize_legal_topic(question);

    Some(ChatHistoryEntry {
        id,
        name: chat_name(category, question, now),
        messages: messages.to_vec(),
        timestamp: now,
        category: category.to_string(),
        duration: (now.saturating_sub(started_at) + MILLIS_PER_MINUTE / 2) / MILLIS_PER_MINUTE,
        message_count: messages.len(),
        is_pinned: false,
        is_starred: false,
        is_archived: false,
        preview: ChatPreview {
            first_question: question_preview(question),
            first_response: response_preview(reply),
        },
        metadata: ChatMetadata {
            complexity: complexity_of(messages),
            satisfaction: None,
            tags: vec![topic_tag(category)],
        },
    })
}

/// Plain-text transcript: one `ROLE: content` block per message, with a
/// `Sources:` line when the message cites any.
pub fn export_text(entry: &ChatHistoryEntry) -> String {
    entry
        .messages
        .iter()
        .map(|message| {
            let sources = message
                .sources
                .as_ref()
                .map(|sources| format!("Sources: {}\n", sources.join(", ")))
                .unwrap_or_default();
            format!(
                "{}: {}\n{sources}\n",
                message.role.as_str().to_uppercase(),
                message.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// File name for an exported transcript; non-alphanumerics become `_`.
pub fn export_file_name(entry: &ChatHistoryEntry) -> String {
    let stem = entry
        .name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect::<String>();
    format!("{stem}.txt")
}

#[cfg(test)]
mod tests {
    use lawgpt_chat::{MessageId, Role};

    use super::*;
    use crate::error::StorageError;
    use crate::memory::MemoryKeyValueStore;
    use crate::types::{Complexity, NO_RESPONSE_PREVIEW};

    const MINUTE: u64 = 60_000;
    const DAY: u64 = 86_400_000;
    const NOW: u64 = 1_750_000_000_000;

    fn store() -> HistoryStore {
        HistoryStore::new(Arc::new(MemoryKeyValueStore::new()))
    }

    fn conversation(question: &str, answer: &str) -> Vec<Message> {
        vec![
            Message::welcome(),
            Message::user(question),
            Message::new(MessageId::new_v7(), Role::Assistant, answer)
                .with_sources(vec!["IPC".to_string(), "CrPC".to_string()]),
        ]
    }

    #[test]
    fn save_session_derives_summary_fields() {
        let history = store();
        let entry = history
            .save_session_at(
                &conversation("When can police deny bail?", "Under Section 437..."),
                NOW - 7 * MINUTE - 20_000,
                NOW,
            )
            .unwrap();

        assert_eq!(entry.category, "Criminal Law");
        assert!(entry.name.starts_with("Criminal Law: When can police deny bail? - "));
        assert_eq!(entry.timestamp, NOW);
        assert_eq!(entry.duration, 7);
        assert_eq!(entry.message_count, 3);
        assert_eq!(entry.preview.first_question, "When can police deny bail?");
        assert_eq!(entry.preview.first_response, "Under Section 437...");
        assert_eq!(entry.metadata.complexity, Complexity::Medium);
        assert_eq!(entry.metadata.tags, vec!["criminal-law".to_string()]);
        assert_eq!(history.get(&entry.id).unwrap(), entry);
    }

    #[test]
    fn saving_without_user_message_fails() {
        let history = store();
        let error = history
            .save_session_at(&[Message::welcome()], NOW, NOW)
            .unwrap_err();

        assert!(matches!(error, StorageError::NoUserMessage { .. }));
        assert!(history.list().unwrap().is_empty());
    }

    #[test]
    fn unanswered_question_previews_no_response() {
        let history = store();
        let entry = history
            .save_session_at(&[Message::welcome(), Message::user("hi")], NOW, NOW)
            .unwrap();

        assert_eq!(entry.preview.first_response, NO_RESPONSE_PREVIEW);
    }

    #[test]
    fn history_keeps_newest_fifty() {
        let history = store();
        let mut first_id = None;
        for index in 0..52 {
            let entry = history
                .save_session_at(&conversation(&format!("q{index}"), "a"), NOW, NOW + index)
                .unwrap();
            first_id.get_or_insert(entry.id);
        }

        let entries = history.list().unwrap();
        assert_eq!(entries.len(), MAX_HISTORY_ENTRIES);
        assert_eq!(entries[0].preview.first_question, "q51");
        assert_eq!(entries[49].preview.first_question, "q2");
        assert!(matches!(
            history.get(&first_id.unwrap()).unwrap_err(),
            StorageError::NotFound { .. }
        ));
    }

    #[test]
    fn find_orders_pinned_then_starred_then_newest() {
        let history = store();
        let oldest = history
            .save_session_at(&conversation("contract one", "a"), NOW, NOW)
            .unwrap();
        let middle = history
            .save_session_at(&conversation("contract two", "a"), NOW, NOW + 1)
            .unwrap();
        let newest = history
            .save_session_at(&conversation("contract three", "a"), NOW, NOW + 2)
            .unwrap();

        history.toggle_star(&middle.id).unwrap();
        history.toggle_pin(&oldest.id).unwrap();

        let ids = history
            .find(&HistoryFilter::default())
            .unwrap()
            .into_iter()
            .map(|entry| entry.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![oldest.id, middle.id, newest.id]);
    }

    #[test]
    fn find_filters_by_text_category_and_archive() {
        let history = store();
        history
            .save_session_at(&conversation("divorce papers", "a"), NOW, NOW - 40 * DAY)
            .unwrap();
        history
            .save_session_at(&conversation("GST filing", "a"), NOW, NOW)
            .unwrap();

        assert_eq!(history.archive_older_than(30, NOW).unwrap(), 1);
        assert_eq!(history.archive_older_than(30, NOW).unwrap(), 0);

        assert_eq!(history.find(&HistoryFilter::default()).unwrap().len(), 1);
        let archived = history
            .find(&HistoryFilter::default().including_archived().with_query("DIVORCE"))
            .unwrap();
        assert_eq!(archived.len(), 1);
        assert!(archived[0].is_archived);

        let tax = history
            .find(&HistoryFilter::default().with_category("tax law"))
            .unwrap();
        assert_eq!(tax.len(), 1);
        assert_eq!(tax[0].category, "Tax Law");
    }

    #[test]
    fn rate_accepts_one_to_five() {
        let history = store();
        let entry = history
            .save_session_at(&conversation("q", "a"), NOW, NOW)
            .unwrap();

        assert_eq!(
            history.rate(&entry.id, 4).unwrap().metadata.satisfaction,
            Some(4)
        );
        for rating in [0, 6] {
            assert!(matches!(
                history.rate(&entry.id, rating).unwrap_err(),
                StorageError::InvalidRating { .. }
            ));
        }
    }

    #[test]
    fn duplicate_and_delete() {
        let history = store();
        let entry = history
            .save_session_at(&conversation("patent term", "20 years"), NOW, NOW)
            .unwrap();

        let copy = history.duplicate(&entry.id).unwrap();
        assert_ne!(copy.id, entry.id);
        assert_eq!(copy.name, format!("{} (Copy)", entry.name));
        assert_eq!(
            copy.metadata.tags,
            vec!["ip-law".to_string(), DUPLICATED_TAG.to_string()]
        );
        assert_eq!(history.list().unwrap()[0].id, copy.id);

        history.delete(&entry.id).unwrap();
        assert!(matches!(
            history.delete(&entry.id).unwrap_err(),
            StorageError::NotFound { .. }
        ));
        assert_eq!(history.list().unwrap().len(), 1);

        history.clear().unwrap();
        assert!(history.list().unwrap().is_empty());
    }

    #[test]
    fn missing_entries_are_not_found() {
        let history = store();
        let id = ChatId::from("nope");

        assert!(matches!(
            history.toggle_star(&id).unwrap_err(),
            StorageError::NotFound { .. }
        ));
        assert!(matches!(
            history.rename(&id, "x").unwrap_err(),
            StorageError::NotFound { .. }
        ));
    }

    #[test]
    fn auto_save_round_trip() {
        let history = store();
        assert_eq!(history.restore_auto_save().unwrap(), None);
        assert_eq!(history.auto_save(&[Message::welcome()], NOW).unwrap(), None);

        let messages = conversation("refund for faulty product", "Consumer Protection Act");
        let saved = history.auto_save(&messages, NOW).unwrap().unwrap();
        assert_eq!(saved.id, ChatId::auto_save());
        assert!(saved.name.ends_with(" (Auto-saved)"));
        assert!(saved.metadata.tags.contains(&AUTO_SAVED_TAG.to_string()));

        let restored = history.restore_auto_save().unwrap().unwrap();
        assert_eq!(restored.messages, messages);
        assert!(history.list().unwrap().is_empty());

        history.clear_auto_save().unwrap();
        assert_eq!(history.restore_auto_save().unwrap(), None);
    }

    #[test]
    fn corrupt_history_is_a_decode_error() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set(CHAT_HISTORY_KEY, "{not json").unwrap();
        let history = HistoryStore::new(kv);

        assert!(matches!(
            history.list().unwrap_err(),
            StorageError::DeserializeJson { .. }
        ));
    }

    #[test]
    fn export_lists_roles_contents_and_sources() {
        let history = store();
        let mut messages = conversation("q?", "a.");
        messages.remove(0);
        let entry = history.save_session_at(&messages, NOW, NOW).unwrap();

        assert_eq!(
            export_text(&entry),
            "USER: q?\n\n\nASSISTANT: a.\nSources: IPC, CrPC\n\n"
        );
        assert!(export_file_name(&entry).ends_with(".txt"));
        assert!(
            export_file_name(&entry)
                .trim_end_matches(".txt")
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        );
    }
}
