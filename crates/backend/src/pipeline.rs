use futures::StreamExt;
use lawgpt_chat::{ApiStatus, ChatAction, ChatStore, Message, MessageId, MessagePatch};

use crate::backend::{ChatBackend, ChunkStream, ResponseBody, ResponseShape};
use crate::decoder::{EventLineDecoder, StreamPayload};
use crate::error::BackendResult;
use crate::reply::{FinalReply, default_sources};

/// How one call to [`send_message`] settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank query; nothing was dispatched.
    Rejected,
    Answered {
        message_id: MessageId,
        shape: ResponseShape,
    },
    /// The backend could not be used and the local fallback was shown.
    Fallback {
        message_id: MessageId,
        error: String,
    },
}

impl SendOutcome {
    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            Self::Rejected => None,
            Self::Answered { message_id, .. } | Self::Fallback { message_id, .. } => {
                Some(message_id)
            }
        }
    }
}

/// Turns one user query into transcript updates and exactly one terminal state.
///
/// The assistant placeholder is addressed by its id, so a message appended
/// behind it can never receive this answer.
pub async fn send_message(
    store: &ChatStore,
    backend: &dyn ChatBackend,
    query: &str,
) -> SendOutcome {
    let query = query.trim();
    if query.is_empty() {
        tracing::debug!("ignoring blank query");
        return SendOutcome::Rejected;
    }

    store.dispatch(ChatAction::AddMessage(Message::user(query)));
    store.dispatch(ChatAction::SetLoading(true));

    let placeholder = Message::assistant_placeholder();
    let message_id = placeholder.id.clone();
    store.dispatch(ChatAction::AddMessage(placeholder));

    let _loading = LoadingGuard::new(store, message_id.clone());

    tracing::info!(
        endpoint = %backend.endpoint(),
        message_id = %message_id,
        query_chars = query.chars().count(),
        "sending chat query"
    );

    match ingest(store, backend, &message_id, query).await {
        Ok((reply, shape)) => {
            store.dispatch(ChatAction::UpdateMessage {
                id: message_id.clone(),
                patch: MessagePatch::finished(reply.content, reply.sources),
            });
            store.dispatch(ChatAction::SetApiStatus(ApiStatus::Connected));
            tracing::info!(message_id = %message_id, shape = ?shape, "chat answer completed");
            SendOutcome::Answered { message_id, shape }
        }
        Err(error) => {
            tracing::error!(
                message_id = %message_id,
                endpoint = %backend.endpoint(),
                error = %error,
                "chat request failed; showing offline fallback"
            );
            let reply = FinalReply::fallback(query);
            store.dispatch(ChatAction::UpdateMessage {
                id: message_id.clone(),
                patch: MessagePatch::finished(reply.content, reply.sources),
            });
            store.dispatch(ChatAction::SetApiStatus(ApiStatus::Disconnected));
            SendOutcome::Fallback {
                message_id,
                error: error.to_string(),
            }
        }
    }
}

async fn ingest(
    store: &ChatStore,
    backend: &dyn ChatBackend,
    message_id: &MessageId,
    query: &str,
) -> BackendResult<(FinalReply, ResponseShape)> {
    let body = backend.send_query(query).await?;
    let shape = body.shape();

    let reply = match body {
        ResponseBody::Complete(bytes) => FinalReply::from_complete_body(&bytes)?,
        ResponseBody::Streaming(chunks) => read_stream(store, message_id, chunks).await?,
    };

    Ok((reply, shape))
}

async fn read_stream(
    store: &ChatStore,
    message_id: &MessageId,
    mut chunks: ChunkStream,
) -> BackendResult<FinalReply> {
    let mut decoder = EventLineDecoder::new();
    let mut accumulator = StreamAccumulator::default();

    while !accumulator.done {
        let Some(chunk) = chunks.next().await else {
            if let Some(payload) = decoder.finish() {
                accumulator.absorb(store, message_id, payload);
            }
            break;
        };

        for payload in decoder.push(&chunk?) {
            accumulator.absorb(store, message_id, payload);
            if accumulator.done {
                break;
            }
        }
    }

    tracing::debug!(
        message_id = %message_id,
        content_chars = accumulator.content.chars().count(),
        skipped_lines = decoder.skipped_lines(),
        finished_with_done = accumulator.done,
        "event stream drained"
    );

    Ok(FinalReply {
        content: accumulator.content,
        sources: accumulator.sources.unwrap_or_else(default_sources),
    })
}

#[derive(Debug, Default)]
struct StreamAccumulator {
    content: String,
    sources: Option<Vec<String>>,
    done: bool,
}

impl StreamAccumulator {
    fn absorb(&mut self, store: &ChatStore, message_id: &MessageId, payload: StreamPayload) {
        if let Some(fragment) = payload.response.filter(|fragment| !fragment.is_empty()) {
            self.content.push_str(&fragment);
            store.dispatch(ChatAction::UpdateMessage {
                id: message_id.clone(),
                patch: MessagePatch::content(self.content.clone()),
            });
        }
        if payload.sources.is_some() {
            self.sources = payload.sources;
        }
        if payload.done {
            self.done = true;
        }
    }
}

/// Clears both loading flags however the pipeline exits, including when its
/// future is dropped while awaiting the backend.
struct LoadingGuard<'a> {
    store: &'a ChatStore,
    message_id: MessageId,
}

impl<'a> LoadingGuard<'a> {
    fn new(store: &'a ChatStore, message_id: MessageId) -> Self {
        Self { store, message_id }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let still_loading = self
            .store
            .snapshot()
            .message(&self.message_id)
            .is_some_and(Message::is_loading);
        if still_loading {
            tracing::debug!(message_id = %self.message_id, "abandoned request; clearing placeholder");
            self.store.dispatch(ChatAction::UpdateMessage {
                id: self.message_id.clone(),
                patch: MessagePatch::default().with_loading(false),
            });
        }
        self.store.dispatch(ChatAction::SetLoading(false));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use lawgpt_chat::{ChatState, Role};

    use super::*;
    use crate::reply::{DEFAULT_SOURCE, FALLBACK_PREFIX, OFFLINE_SOURCE};
    use crate::scripted::{ScriptedBackend, ScriptedReply};

    fn last_assistant(state: &ChatState) -> &Message {
        let last = state.last_message().unwrap();
        assert_eq!(last.role, Role::Assistant);
        last
    }

    #[tokio::test]
    async fn complete_answer_replaces_placeholder() {
        let store = ChatStore::default();
        let backend =
            ScriptedBackend::new().with_reply(ScriptedReply::json(r#"{"response":"IPC 302 covers murder."}"#));

        let outcome = send_message(&store, &backend, "What is Section 302 IPC?").await;

        let state = store.snapshot();
        let answer = last_assistant(&state);
        assert_eq!(answer.content, "IPC 302 covers murder.");
        assert!(!answer.is_loading());
        assert_eq!(answer.sources, Some(vec![DEFAULT_SOURCE.to_string()]));
        assert!(!state.is_loading);
        assert_eq!(state.api_status, ApiStatus::Connected);
        assert!(matches!(
            outcome,
            SendOutcome::Answered {
                shape: ResponseShape::Complete,
                ..
            }
        ));
        assert_eq!(backend.queries(), vec!["What is Section 302 IPC?".to_string()]);
    }

    #[tokio::test]
    async fn network_failure_shows_fallback_and_disconnects() {
        let store = ChatStore::default();
        let backend = ScriptedBackend::new().with_reply(ScriptedReply::Unreachable);

        let outcome = send_message(&store, &backend, "Can my landlord evict me?").await;

        let state = store.snapshot();
        let answer = last_assistant(&state);
        assert!(answer.content.starts_with(FALLBACK_PREFIX));
        assert!(answer.content.contains("Can my landlord evict me?"));
        assert_eq!(answer.sources, Some(vec![OFFLINE_SOURCE.to_string()]));
        assert!(!answer.is_loading());
        assert!(!state.is_loading);
        assert_eq!(state.api_status, ApiStatus::Disconnected);
        assert!(matches!(outcome, SendOutcome::Fallback { .. }));
    }

    #[tokio::test]
    async fn non_success_status_and_bad_json_fall_back() {
        for reply in [ScriptedReply::Status(503), ScriptedReply::json("not json")] {
            let store = ChatStore::default();
            let backend = ScriptedBackend::new().with_reply(reply);

            send_message(&store, &backend, "query").await;

            let state = store.snapshot();
            assert!(last_assistant(&state).content.starts_with(FALLBACK_PREFIX));
            assert_eq!(state.api_status, ApiStatus::Disconnected);
            assert!(!state.is_loading);
        }
    }

    #[tokio::test]
    async fn streamed_fragments_accumulate_into_final_content() {
        let store = ChatStore::default();
        let backend = ScriptedBackend::new().with_reply(ScriptedReply::stream([
            "data: {\"response\":\"Hel\"}\n",
            "data: {\"response\":\"lo\"}\n",
            "data: {\"done\":true}\n",
        ]));

        let outcome = send_message(&store, &backend, "greet me").await;

        let state = store.snapshot();
        let answer = last_assistant(&state);
        assert_eq!(answer.content, "Hello");
        assert!(!answer.is_loading());
        assert_eq!(answer.sources, Some(vec![DEFAULT_SOURCE.to_string()]));
        assert!(matches!(
            outcome,
            SendOutcome::Answered {
                shape: ResponseShape::Streaming,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn streamed_content_grows_monotonically() {
        let store = ChatStore::default();
        let mut receiver = store.subscribe();
        let fragments = ["The ", "Indian ", "Penal ", "Code"];
        let chunks = fragments
            .iter()
            .map(|fragment| format!("data: {{\"response\":\"{fragment}\"}}\n"))
            .chain(std::iter::once("data: {\"done\":true}\n".to_string()))
            .collect::<Vec<_>>();
        let backend = ScriptedBackend::new().with_reply(ScriptedReply::stream(chunks));

        let observer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while receiver.changed().await.is_ok() {
                let state = receiver.borrow_and_update().clone();
                if let Some(last) = state.last_message()
                    && last.role == Role::Assistant
                    && last.is_loading()
                    && seen.last() != Some(&last.content)
                {
                    seen.push(last.content.clone());
                }
                if !state.is_loading && state.messages.len() == 3 {
                    break;
                }
            }
            seen
        });

        send_message(&store, &backend, "what is ipc").await;
        let seen = tokio::time::timeout(Duration::from_secs(5), observer)
            .await
            .unwrap()
            .unwrap();

        for window in seen.windows(2) {
            assert!(window[1].starts_with(&window[0]));
            assert!(window[1].len() > window[0].len());
        }
        assert_eq!(store.snapshot().last_message().unwrap().content, "The Indian Penal Code");
    }

    #[tokio::test]
    async fn done_stops_reading_further_chunks() {
        let store = ChatStore::default();
        let backend = ScriptedBackend::new().with_reply(ScriptedReply::stream([
            "data: {\"response\":\"final\"}\ndata: {\"done\":true}\ndata: {\"response\":\" ignored\"}\n",
            "data: {\"response\":\" never read\"}\n",
        ]));

        send_message(&store, &backend, "query").await;

        assert_eq!(store.snapshot().last_message().unwrap().content, "final");
        assert_eq!(backend.chunks_pulled(), 1);
    }

    #[tokio::test]
    async fn non_data_and_malformed_lines_do_not_alter_content() {
        let store = ChatStore::default();
        let backend = ScriptedBackend::new().with_reply(ScriptedReply::stream([
            ": comment\n",
            "data: {\"response\":\"Sec\"}\n",
            "data: {broken\n",
            "event: ping\n",
            "data: {\"response\":\"tion\"}\n",
            "data: {\"done\":true,\"sources\":[\"Indian Penal Code\"]}\n",
        ]));

        send_message(&store, &backend, "query").await;

        let state = store.snapshot();
        let answer = last_assistant(&state);
        assert_eq!(answer.content, "Section");
        assert_eq!(answer.sources, Some(vec!["Indian Penal Code".to_string()]));
        assert_eq!(state.api_status, ApiStatus::Connected);
    }

    #[tokio::test]
    async fn stream_without_done_completes_at_end_of_body() {
        let store = ChatStore::default();
        let backend = ScriptedBackend::new().with_reply(ScriptedReply::stream([
            "data: {\"response\":\"partial\"}\n",
            "data: {\"response\":\" tail\"}",
        ]));

        let outcome = send_message(&store, &backend, "query").await;

        assert_eq!(store.snapshot().last_message().unwrap().content, "partial tail");
        assert!(matches!(outcome, SendOutcome::Answered { .. }));
    }

    #[tokio::test]
    async fn body_read_error_mid_stream_discards_partial_content() {
        let store = ChatStore::default();
        let backend = ScriptedBackend::new().with_reply(ScriptedReply::stream_then_error([
            "data: {\"response\":\"half an ans\"}\n",
        ]));

        send_message(&store, &backend, "query").await;

        let state = store.snapshot();
        let answer = last_assistant(&state);
        assert!(answer.content.starts_with(FALLBACK_PREFIX));
        assert!(!answer.content.contains("half an ans"));
        assert!(!answer.is_loading());
        assert_eq!(state.api_status, ApiStatus::Disconnected);
    }

    #[tokio::test]
    async fn every_send_appends_exactly_two_messages() {
        let store = ChatStore::default();
        let backend = ScriptedBackend::new()
            .with_reply(ScriptedReply::json(r#"{"response":"one"}"#))
            .with_reply(ScriptedReply::Unreachable)
            .with_reply(ScriptedReply::stream(["data: {\"done\":true}\n"]));

        for (round, query) in ["first", "second", "third"].into_iter().enumerate() {
            send_message(&store, &backend, query).await;
            let state = store.snapshot();
            assert_eq!(state.messages.len(), 1 + 2 * (round + 1));
            assert_eq!(state.loading_message_count(), 0);
            assert_eq!(state.messages[state.messages.len() - 2].content, query);
        }
    }

    #[tokio::test]
    async fn blank_query_is_rejected_without_state_changes() {
        let store = ChatStore::default();
        let backend = ScriptedBackend::new();
        let before = store.snapshot();

        let outcome = send_message(&store, &backend, "   \n\t").await;

        assert_eq!(outcome, SendOutcome::Rejected);
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
        assert!(backend.queries().is_empty());
    }

    #[tokio::test]
    async fn placeholder_is_loading_while_request_is_in_flight() {
        let store = ChatStore::default();
        let backend = Arc::new(ScriptedBackend::new().with_reply(ScriptedReply::Pending));

        let task = {
            let store = store.clone();
            let backend = backend.clone();
            tokio::spawn(async move { send_message(&store, backend.as_ref(), "slow").await })
        };

        let mut receiver = store.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            receiver.wait_for(|state| state.messages.len() == 3),
        )
        .await
        .unwrap()
        .unwrap();

        let state = store.snapshot();
        assert!(state.is_loading);
        assert!(state.last_message().unwrap().is_loading());
        assert_eq!(state.loading_message_count(), 1);

        task.abort();
        let _ = task.await;

        let state = store.snapshot();
        assert!(!state.is_loading);
        assert_eq!(state.loading_message_count(), 0);
    }
}
