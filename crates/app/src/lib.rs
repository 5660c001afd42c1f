//! Terminal client for the Law GPT legal assistant.

pub mod logging;
pub mod session;
pub mod settings;
pub mod terminal;
