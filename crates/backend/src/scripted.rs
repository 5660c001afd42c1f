//! In-memory backend that replays canned replies, for exercising the pipeline
//! without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::{StreamExt, future, stream};

use crate::backend::{BoxFuture, ChatBackend, ChunkStream, ResponseBody};
use crate::error::{BackendError, BackendResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Complete JSON body.
    Json(String),
    /// Streamed body delivered chunk by chunk.
    Stream(Vec<String>),
    /// Streamed chunks followed by a body-read failure.
    StreamThenError(Vec<String>),
    /// Non-success HTTP status.
    Status(u16),
    /// Connection refused before any response.
    Unreachable,
    /// Never answers.
    Pending,
}

impl ScriptedReply {
    pub fn json(body: impl Into<String>) -> Self {
        Self::Json(body.into())
    }

    pub fn stream<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Stream(chunks.into_iter().map(Into::into).collect())
    }

    pub fn stream_then_error<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::StreamThenError(chunks.into_iter().map(Into::into).collect())
    }
}

/// Replies are consumed in order; once exhausted every query is unreachable.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<ScriptedReply>>,
    queries: Mutex<Vec<String>>,
    healthy: Option<u16>,
    chunks_pulled: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, reply: ScriptedReply) -> Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
        self
    }

    /// Status answered by the health endpoint; `None` means unreachable.
    pub fn with_health_status(mut self, status: Option<u16>) -> Self {
        self.healthy = status;
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .map(|queries| queries.clone())
            .unwrap_or_default()
    }

    /// Total number of body chunks handed to readers so far.
    pub fn chunks_pulled(&self) -> usize {
        self.chunks_pulled.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> ScriptedReply {
        self.replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front())
            .unwrap_or(ScriptedReply::Unreachable)
    }

    fn chunk_stream(&self, chunks: Vec<String>, fail_at_end: bool) -> ChunkStream {
        let counter = self.chunks_pulled.clone();
        let mut items = chunks
            .into_iter()
            .map(|chunk| Ok(chunk.into_bytes()))
            .collect::<Vec<BackendResult<Vec<u8>>>>();
        if fail_at_end {
            items.push(Err(BackendError::Transport {
                stage: "scripted-read-chunk",
                message: "connection reset by peer".to_string(),
            }));
        }

        Box::pin(
            stream::iter(items)
                .inspect(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .then(|item| async move {
                    // Let other tasks observe each intermediate state.
                    tokio::task::yield_now().await;
                    item
                }),
        )
    }
}

impl ChatBackend for ScriptedBackend {
    fn endpoint(&self) -> &str {
        "scripted://backend"
    }

    fn send_query<'a>(&'a self, query: &'a str) -> BoxFuture<'a, BackendResult<ResponseBody>> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }
        let reply = self.next_reply();

        Box::pin(async move {
            match reply {
                ScriptedReply::Json(body) => Ok(ResponseBody::Complete(body.into_bytes())),
                ScriptedReply::Stream(chunks) => {
                    Ok(ResponseBody::Streaming(self.chunk_stream(chunks, false)))
                }
                ScriptedReply::StreamThenError(chunks) => {
                    Ok(ResponseBody::Streaming(self.chunk_stream(chunks, true)))
                }
                ScriptedReply::Status(status) => Err(BackendError::UnexpectedStatus {
                    stage: "scripted-chat-status",
                    status,
                }),
                ScriptedReply::Unreachable => Err(BackendError::Transport {
                    stage: "scripted-connect",
                    message: "connection refused".to_string(),
                }),
                ScriptedReply::Pending => future::pending().await,
            }
        })
    }

    fn check_health<'a>(&'a self) -> BoxFuture<'a, BackendResult<()>> {
        let healthy = self.healthy;
        Box::pin(async move {
            match healthy {
                Some(status) if (200..300).contains(&status) => Ok(()),
                Some(status) => Err(BackendError::UnexpectedStatus {
                    stage: "scripted-health-status",
                    status,
                }),
                None => Err(BackendError::Transport {
                    stage: "scripted-health-connect",
                    message: "connection refused".to_string(),
                }),
            }
        })
    }
}
