//! Client side of the legal-AI backend: transport, stream decoding, and the
//! ingestion pipeline that turns one query into chat state updates.

use std::sync::Arc;

mod backend;
mod decoder;
mod error;
mod http;
mod pipeline;
mod probe;
mod reply;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;

pub use backend::{
    BackendConfig, BoxFuture, ChatBackend, ChunkStream, DEFAULT_ENDPOINT, ResponseBody,
    ResponseShape, normalize_endpoint, resolve_body,
};
pub use decoder::{DATA_LINE_PREFIX, EventLineDecoder, StreamPayload};
pub use error::{BackendError, BackendResult};
pub use http::HttpBackend;
pub use pipeline::{SendOutcome, send_message};
pub use probe::check_connection;
pub use reply::{
    DEFAULT_SOURCE, FALLBACK_PREFIX, FALLBACK_QUERY_ECHO_CHARS, FinalReply, NO_RESPONSE_CONTENT,
    OFFLINE_SOURCE,
};

pub fn create_backend(config: BackendConfig) -> BackendResult<Arc<dyn ChatBackend>> {
    Ok(Arc::new(HttpBackend::new(config)?))
}
