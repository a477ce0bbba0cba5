//! Transport seam between the lifecycle and the network.
//!
//! The lifecycle never touches reqwest directly; it drives a
//! [`CompletionTransport`], and tests inject scripted implementations
//! through the same trait. That keeps every streaming behavior,
//! including cancellation before the first byte, testable without a
//! server and without patching anything global.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Connect-phase timeout for the production transport. The per-attempt
/// deadline enforced by the lifecycle covers everything after that.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Boxed chunk stream over a response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Wire body for `POST` to the completions endpoint.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompletionRequest {
    /// The new user input.
    pub message: String,
    /// Provider service to route to.
    pub service: String,
    /// Model within the service.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Session to continue. Omitted from the wire until one is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Request the chunked record stream instead of one object.
    pub stream: bool,
}

/// Transport-level failure, raised when no classified HTTP status was
/// obtained or the body stream broke underneath us.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The endpoint could not be reached at all.
    #[error("connection failed: {0}")]
    Connect(String),
    /// The transport's own timeout fired.
    #[error("transport timed out")]
    TimedOut,
    /// The body stream failed mid-read.
    #[error("body read failed: {0}")]
    Read(String),
    /// Client construction failed.
    #[error("transport setup failed: {0}")]
    Setup(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::TimedOut
        } else if err.is_body() || err.is_decode() {
            Self::Read(err.to_string())
        } else {
            Self::Connect(err.to_string())
        }
    }
}

/// Everything the lifecycle needs from a response before reading the
/// body.
pub struct TransportReply {
    /// HTTP status line.
    pub status: StatusCode,
    /// Parsed `Retry-After` header, integer-seconds form only.
    pub retry_after: Option<Duration>,
    /// Response body as a chunk stream.
    pub body: ByteStream,
}

/// A transport able to execute one completion request.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    /// Execute the request, returning the status, the headers the
    /// client cares about, and the body stream.
    async fn execute(&self, request: &CompletionRequest) -> Result<TransportReply, TransportError>;
}

/// Production HTTP transport over reqwest.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport for the given completions endpoint.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|err| TransportError::Setup(err.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    /// The configured endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CompletionTransport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn execute(&self, request: &CompletionRequest) -> Result<TransportReply, TransportError> {
        debug!(
            endpoint = %self.endpoint,
            service = %request.service,
            model = %request.model,
            stream = request.stream,
            has_session = request.session_id.is_some(),
            "Dispatching completion request"
        );
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await?;
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        debug!(status = %status, "Completion endpoint responded");

        let body: ByteStream =
            Box::pin(response.bytes_stream().map(|item| item.map_err(TransportError::from)));
        Ok(TransportReply {
            status,
            retry_after,
            body,
        })
    }
}

/// Parse the integer-seconds form of `Retry-After`. The HTTP-date form
/// is ignored; a missing hint is an acceptable answer.
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let text = headers.get(RETRY_AFTER)?.to_str().ok()?;
    match text.trim().parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) => {
            debug!(value = text, "Unparsed retry-after form ignored");
            None
        }
    }
}
