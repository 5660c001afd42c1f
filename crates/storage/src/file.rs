use std::io::ErrorKind;
use std::path::PathBuf;

use snafu::{ResultExt, ensure};

use crate::KeyValueStore;
use crate::error::{
    CreateDirectorySnafu, InvalidKeySnafu, ReadFileSnafu, RemoveFileSnafu, RenameTempFileSnafu,
    StorageResult, WriteFileSnafu,
};

pub const DATA_DIRECTORY_NAME: &str = "lawgpt";

/// One `<key>.json` file per key under a root directory.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash never leaves a half-written value behind.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    root: PathBuf,
}

impl FileKeyValueStore {
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|path| path.join(DATA_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".lawgpt"))
    }

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        // Keys become file names; anything that could escape the root is refused.
        ensure!(
            !key.is_empty()
                && key
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'),
            InvalidKeySnafu {
                stage: "file-store-key",
                key: key.to_string(),
            }
        );
        Ok(self.root.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error).context(ReadFileSnafu {
                stage: "read-storage-file",
                path,
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.root).context(CreateDirectorySnafu {
            stage: "create-storage-directory",
            path: self.root.clone(),
        })?;

        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, value).context(WriteFileSnafu {
            stage: "write-temporary-storage-file",
            path: temp_path.clone(),
        })?;
        std::fs::rename(&temp_path, &path).context(RenameTempFileSnafu {
            stage: "rename-temporary-storage-file",
            from: temp_path,
            to: path.clone(),
        })?;

        tracing::debug!(path = ?path, bytes = value.len(), "stored value");
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error).context(RemoveFileSnafu {
                stage: "remove-storage-file",
                path,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    #[test]
    fn values_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("lawgpt");

        FileKeyValueStore::new(&root)
            .set("lawgpt-chat-history", "[1,2]")
            .unwrap();

        let reopened = FileKeyValueStore::new(&root);
        assert_eq!(
            reopened.get("lawgpt-chat-history").unwrap().as_deref(),
            Some("[1,2]")
        );
        assert!(root.join("lawgpt-chat-history.json").exists());
        assert!(!root.join("lawgpt-chat-history.json.tmp").exists());
    }

    #[test]
    fn missing_keys_read_as_none_and_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyValueStore::new(dir.path());

        assert_eq!(store.get("absent").unwrap(), None);
        store.remove("absent").unwrap();

        store.set("present", "x").unwrap();
        store.remove("present").unwrap();
        assert_eq!(store.get("present").unwrap(), None);
    }

    #[test]
    fn path_like_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyValueStore::new(dir.path());

        for key in ["../escape", "a/b", ""] {
            let error = store.set(key, "x").unwrap_err();
            assert!(matches!(error, StorageError::InvalidKey { .. }));
        }
    }
}
