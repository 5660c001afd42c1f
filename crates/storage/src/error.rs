use std::path::PathBuf;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    #[snafu(display("storage entity '{entity}' with id '{id}' was not found"))]
    NotFound {
        stage: &'static str,
        entity: &'static str,
        id: String,
    },
    #[snafu(display("rating {rating} is outside 1..=5 on `{stage}`"))]
    InvalidRating { stage: &'static str, rating: u8 },
    #[snafu(display("conversation has no user message to save on `{stage}`"))]
    NoUserMessage { stage: &'static str },
    #[snafu(display("storage key '{key}' is invalid on `{stage}`"))]
    InvalidKey { stage: &'static str, key: String },
    #[snafu(display("failed to serialize storage value on `{stage}`: {source}"))]
    SerializeJson {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to decode stored value for '{key}' on `{stage}`: {source}"))]
    DeserializeJson {
        stage: &'static str,
        key: String,
        source: serde_json::Error,
    },
    #[snafu(display("failed to create storage directory at {path:?} on `{stage}`: {source}"))]
    CreateDirectory {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to read storage file at {path:?} on `{stage}`: {source}"))]
    ReadFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to write storage file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace storage file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to remove storage file at {path:?} on `{stage}`: {source}"))]
    RemoveFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("storage lock was poisoned on `{stage}`"))]
    LockPoisoned { stage: &'static str },
}

pub type StorageResult<T> = Result<T, StorageError>;
