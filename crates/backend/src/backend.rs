use std::future::Future;
use std::pin::Pin;

use futures::{Stream, StreamExt, stream};

use crate::error::BackendResult;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8001";

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ChunkStream = Pin<Box<dyn Stream<Item = BackendResult<Vec<u8>>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub endpoint: String,
}

impl BackendConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: normalize_endpoint(&endpoint.into()),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

/// Trims whitespace and trailing slashes so paths can be appended verbatim.
pub fn normalize_endpoint(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

/// How the backend chose to deliver one answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseShape {
    /// One JSON object holding the full answer.
    Complete,
    /// `data: {...}` lines carrying partial answers.
    Streaming,
}

impl ResponseShape {
    /// Resolves the shape from a `Content-Type` header when it is conclusive.
    pub fn from_content_type(content_type: Option<&str>) -> Option<Self> {
        let essence = content_type?
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if essence == "text/event-stream" {
            Some(Self::Streaming)
        } else if essence == "application/json" || essence.ends_with("+json") {
            Some(Self::Complete)
        } else {
            None
        }
    }
}

/// Response body resolved once per request into its delivery shape.
pub enum ResponseBody {
    Complete(Vec<u8>),
    Streaming(ChunkStream),
}

impl ResponseBody {
    pub fn shape(&self) -> ResponseShape {
        match self {
            Self::Complete(_) => ResponseShape::Complete,
            Self::Streaming(_) => ResponseShape::Streaming,
        }
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(body) => formatter
                .debug_tuple("Complete")
                .field(&body.len())
                .finish(),
            Self::Streaming(_) => formatter.write_str("Streaming(..)"),
        }
    }
}

/// Capability surface of the legal-AI backend.
pub trait ChatBackend: Send + Sync {
    fn endpoint(&self) -> &str;
    /// Issues one chat request and returns its body once headers have arrived.
    fn send_query<'a>(&'a self, query: &'a str) -> BoxFuture<'a, BackendResult<ResponseBody>>;
    /// Lightweight health check; `Ok` means the backend answered with 2xx.
    fn check_health<'a>(&'a self) -> BoxFuture<'a, BackendResult<()>>;
}

/// Decides between complete and streaming delivery.
///
/// A conclusive `Content-Type` wins. Otherwise the leading bytes are sniffed:
/// a body opening with `data:` is an event stream, anything else is collected
/// into one JSON document. Sniffed bytes are replayed, never lost.
pub async fn resolve_body(
    content_type: Option<&str>,
    mut chunks: ChunkStream,
) -> BackendResult<ResponseBody> {
    match ResponseShape::from_content_type(content_type) {
        Some(ResponseShape::Streaming) => return Ok(ResponseBody::Streaming(chunks)),
        Some(ResponseShape::Complete) => {
            return collect_chunks(Vec::new(), chunks)
                .await
                .map(ResponseBody::Complete);
        }
        None => {}
    }

    let mut prefix = Vec::new();
    while prefix.iter().all(u8::is_ascii_whitespace) {
        match chunks.next().await {
            Some(chunk) => prefix.extend_from_slice(&chunk?),
            None => return Ok(ResponseBody::Complete(prefix)),
        }
    }

    if looks_like_event_stream(&prefix) {
        tracing::debug!(
            content_type = ?content_type,
            "sniffed event stream from leading response bytes"
        );
        let replay = stream::once(async move { Ok(prefix) });
        return Ok(ResponseBody::Streaming(Box::pin(replay.chain(chunks))));
    }

    collect_chunks(prefix, chunks)
        .await
        .map(ResponseBody::Complete)
}

fn looks_like_event_stream(prefix: &[u8]) -> bool {
    let start = prefix
        .iter()
        .position(|byte| !byte.is_ascii_whitespace())
        .unwrap_or(prefix.len());
    prefix[start..].starts_with(b"data:")
}

async fn collect_chunks(mut body: Vec<u8>, mut chunks: ChunkStream) -> BackendResult<Vec<u8>> {
    while let Some(chunk) = chunks.next().await {
        body.extend_from_slice(&chunk?);
    }
    Ok(body)
}
