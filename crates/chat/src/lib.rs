//! Chat transcript model and the reducer-driven state store.
//!
//! This crate has no knowledge of the backend or of persistence; it only
//! defines what a conversation looks like and how it may change.

mod message;
mod state;
mod store;

pub use message::{
    Message, MessageId, MessagePatch, Role, WELCOME_MESSAGE_CONTENT, WELCOME_MESSAGE_ID,
    WELCOME_MESSAGE_SOURCES, current_unix_timestamp_millis,
};
pub use state::{ApiStatus, ChatAction, ChatState};
pub use store::ChatStore;
