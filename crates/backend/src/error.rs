use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BackendError {
    #[snafu(display("backend endpoint is not configured"))]
    MissingEndpoint { stage: &'static str },
    #[snafu(display("failed to build http client on `{stage}`: {source}"))]
    BuildHttpClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("request to {url} failed on `{stage}`: {source}"))]
    SendRequest {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
    #[snafu(display("backend returned status {status} on `{stage}`"))]
    UnexpectedStatus { stage: &'static str, status: u16 },
    #[snafu(display("transport failed on `{stage}`: {message}"))]
    Transport {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("failed to decode backend response on `{stage}`: {source}"))]
    DecodeResponse {
        stage: &'static str,
        source: serde_json::Error,
    },
}

pub type BackendResult<T> = Result<T, BackendError>;
