pub mod error;
pub mod file;
pub mod history;
pub mod ids;
pub mod memory;
pub mod topic;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use file::FileKeyValueStore;
pub use history::{HistoryStore, export_file_name, export_text};
pub use ids::{AUTO_SAVE_CHAT_ID, ChatId};
pub use memory::MemoryKeyValueStore;
pub use topic::categorize_legal_topic;
pub use types::{
    AUTO_SAVE_KEY, CHAT_HISTORY_KEY, ChatHistoryEntry, ChatMetadata, ChatPreview, Complexity,
    GENERAL_LEGAL_CATEGORY, HistoryFilter, MAX_HISTORY_ENTRIES,
};

/// String key-value persistence under the history store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    /// Removing an absent key is not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;
}
