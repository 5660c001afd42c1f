use serde::Deserialize;
use snafu::ResultExt;

use crate::error::{BackendResult, DecodeResponseSnafu};

pub const DEFAULT_SOURCE: &str = "Legal Knowledge Base";
pub const OFFLINE_SOURCE: &str = "Offline Mode - General Legal Principles";
pub const NO_RESPONSE_CONTENT: &str = "No response received";

/// Opening line of every locally generated answer.
pub const FALLBACK_PREFIX: &str = "⚠️ **Connection Issue**";
/// Number of query characters echoed back by the fallback answer.
pub const FALLBACK_QUERY_ECHO_CHARS: usize = 50;

/// Final content and citations for one assistant message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalReply {
    pub content: String,
    pub sources: Vec<String>,
}

/// Single-shot JSON answer. Two field names carry the text depending on the
/// backend revision.
#[derive(Debug, Clone, Default, Deserialize)]
struct CompletePayload {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    sources: Option<Vec<String>>,
    #[serde(default)]
    web_search_performed: bool,
    #[serde(default)]
    web_results_count: Option<u64>,
}

impl FinalReply {
    pub fn from_complete_body(body: &[u8]) -> BackendResult<Self> {
        let payload: CompletePayload = serde_json::from_slice(body).context(DecodeResponseSnafu {
            stage: "decode-complete-response",
        })?;

        let content = [payload.response, payload.message]
            .into_iter()
            .flatten()
            .find(|text| !text.is_empty())
            .unwrap_or_else(|| NO_RESPONSE_CONTENT.to_string());

        let mut sources = payload.sources.unwrap_or_else(default_sources);
        if payload.web_search_performed {
            let count = payload.web_results_count.unwrap_or(0);
            sources.insert(0, format!("🌐 Web Search ({count} results)"));
        }

        Ok(Self { content, sources })
    }

    /// Locally generated answer shown when the backend could not be used.
    pub fn fallback(query: &str) -> Self {
        let echoed = query
            .chars()
            .take(FALLBACK_QUERY_ECHO_CHARS)
            .collect::<String>();
        let content = format!(
            "{FALLBACK_PREFIX}\n\n\
             I apologize, but I'm currently unable to access the legal database. \
             However, regarding your question about \"{echoed}...\":\n\n\
             • **Always consult** with a qualified attorney for specific legal advice\n\
             • **Legal matters** often depend on jurisdiction and specific circumstances\n\
             • **Documentation** and evidence are crucial in legal proceedings\n\n\
             Please try again when connection is restored, or consult with a legal \
             professional for immediate assistance."
        );

        Self {
            content,
            sources: vec![OFFLINE_SOURCE.to_string()],
        }
    }
}

pub fn default_sources() -> Vec<String> {
    vec![DEFAULT_SOURCE.to_string()]
}
