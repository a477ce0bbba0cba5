//! Failure taxonomy for completion exchanges.
//!
//! Every way an exchange can end badly maps to exactly one [`ChatError`]
//! variant, so surfaces can branch on the class instead of parsing
//! strings. Classification happens at two points: the HTTP status line
//! before any body byte is read, and transport or stream faults while
//! the body is being pumped. Per-record malformation is not an error at
//! all; corrupt records are dropped where they are decoded.

use std::time::Duration;

use thiserror::Error;

/// Terminal failure for one completion exchange.
#[derive(Clone, Debug, Error, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ChatError {
    /// The endpoint rejected the client's credentials (HTTP 401).
    #[error("authentication failed; check the configured API key")]
    Authentication,

    /// The provider is rate limiting this client (HTTP 429).
    #[error("provider rate limited the request{}", retry_hint(.retry_after))]
    RateLimited {
        /// Parsed `Retry-After` header, when the server sent one.
        retry_after: Option<Duration>,
    },

    /// The account has no remaining quota for this provider (HTTP 403).
    #[error("provider quota exhausted")]
    QuotaExhausted,

    /// The requested model or session does not exist (HTTP 404).
    #[error("not found: {resource}")]
    NotFound {
        /// What the server could not find.
        resource: String,
    },

    /// Any other non-success HTTP status.
    #[error("completion request failed with status {code}: {message}")]
    Api {
        /// HTTP status code.
        code: u16,
        /// Server-provided detail, or a generic phrase when absent.
        message: String,
    },

    /// No usable response arrived: connect refused, DNS failure, or a
    /// broken body read.
    #[error("connection failed: {message}")]
    Connection {
        /// Transport-level detail.
        message: String,
    },

    /// The exchange deadline elapsed, measured from request issuance.
    #[error("request timed out after {elapsed:?}")]
    Timeout {
        /// The configured deadline that was exceeded.
        elapsed: Duration,
    },

    /// The server committed to a stream, then reported failure inside it.
    #[error("response stream failed: {message}")]
    StreamFailure {
        /// Server-provided detail.
        message: String,
    },
}

impl ChatError {
    /// Classify a non-success HTTP status.
    ///
    /// `detail` is the message recovered from the error body, when one
    /// could be read and parsed.
    #[must_use]
    pub fn from_status(code: u16, retry_after: Option<Duration>, detail: Option<String>) -> Self {
        match code {
            401 => Self::Authentication,
            403 => Self::QuotaExhausted,
            404 => Self::NotFound {
                resource: detail.unwrap_or_else(|| "requested model or session".to_string()),
            },
            429 => Self::RateLimited { retry_after },
            _ => Self::Api {
                code,
                message: detail.unwrap_or_else(|| "request failed".to_string()),
            },
        }
    }

    /// Whether this failure is the one class that arms provider fallback.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Server-suggested wait before retrying, if the failure carried one.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(wait) => format!(" (retry after {}s)", wait.as_secs()),
        None => String::new(),
    }
}

/// Pull a human-readable message out of an error response body.
///
/// Providers disagree on the shape; the common forms are a top-level
/// `error` string, an `error` object with a `message` field, or a
/// top-level `message`. Anything unreadable yields `None` and the
/// caller falls back to a generic phrase.
#[must_use]
pub fn error_message_from_body(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let message = match value.get("error") {
        Some(serde_json::Value::String(text)) => Some(text.clone()),
        Some(serde_json::Value::Object(fields)) => fields
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map(String::from),
        _ => value
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map(String::from),
    };
    message.filter(|text| !text.trim().is_empty())
}
