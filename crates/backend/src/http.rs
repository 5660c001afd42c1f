use futures::StreamExt;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use snafu::{ResultExt, ensure};

use crate::backend::{
    BackendConfig, BoxFuture, ChatBackend, ChunkStream, ResponseBody, resolve_body,
};
use crate::error::{
    BackendError, BackendResult, BuildHttpClientSnafu, MissingEndpointSnafu, SendRequestSnafu,
    UnexpectedStatusSnafu,
};

const CHAT_PATH: &str = "/chat";
const HEALTH_PATH: &str = "/";
const CHAT_ACCEPT: &str = "application/json, text/event-stream";

#[derive(Serialize)]
struct ChatRequest<'a> {
    query: &'a str,
}

/// Backend reached over HTTP with `reqwest`.
///
/// No request timeout is configured; hung connections are bounded only by the
/// transport itself.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    config: BackendConfig,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> BackendResult<Self> {
        ensure!(
            !config.endpoint.is_empty(),
            MissingEndpointSnafu {
                stage: "http-backend-new",
            }
        );

        let client = Client::builder().build().context(BuildHttpClientSnafu {
            stage: "build-client",
        })?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint, path)
    }

    async fn post_chat(&self, query: &str) -> BackendResult<ResponseBody> {
        let url = self.url(CHAT_PATH);
        let response = self
            .client
            .post(&url)
            .header(ACCEPT, CHAT_ACCEPT)
            .json(&ChatRequest { query })
            .send()
            .await
            .context(SendRequestSnafu {
                stage: "send-chat-request",
                url: url.clone(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return UnexpectedStatusSnafu {
                stage: "chat-http-status",
                status: status.as_u16(),
            }
            .fail();
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        tracing::debug!(
            url = %url,
            status = status.as_u16(),
            content_type = ?content_type,
            "chat response headers received"
        );

        let chunks: ChunkStream = Box::pin(response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|source| BackendError::Transport {
                    stage: "read-chat-chunk",
                    message: source.to_string(),
                })
        }));

        resolve_body(content_type.as_deref(), chunks).await
    }

    async fn get_health(&self) -> BackendResult<()> {
        let url = self.url(HEALTH_PATH);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context(SendRequestSnafu {
                stage: "send-health-request",
                url: url.clone(),
            })?;

        let status = response.status();
        ensure!(
            status.is_success(),
            UnexpectedStatusSnafu {
                stage: "health-http-status",
                status: status.as_u16(),
            }
        );
        Ok(())
    }
}

impl ChatBackend for HttpBackend {
    fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    fn send_query<'a>(&'a self, query: &'a str) -> BoxFuture<'a, BackendResult<ResponseBody>> {
        Box::pin(self.post_chat(query))
    }

    fn check_health<'a>(&'a self) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(self.get_health())
    }
}
