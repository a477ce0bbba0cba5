//! Typed interpretation of decoded records.
//!
//! One record in, at most one [`StreamEvent`] out. Interpretation is
//! deliberately forgiving: a record with a missing prefix, unparseable
//! JSON, an unknown `type`, or a missing required field yields no event
//! and the stream carries on. A single corrupt record must never take
//! down an otherwise healthy response, so this module has no error
//! path at all.
//!
//! Payload fields may sit at the top level or nested one level under a
//! `data` envelope; both shapes are accepted, with top-level fields
//! winning when the two disagree.

use serde::Deserialize;
use tracing::debug;

/// Framing prefix on every event-carrying record.
pub const RECORD_PREFIX: &str = "data:";

/// One typed event from the response stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// A fragment of assistant output, appended in receipt order.
    ContentDelta {
        /// The text fragment. May be empty.
        text: String,
    },
    /// The server assigned a session id to this conversation.
    SessionAssigned {
        /// Server-side session identifier.
        session_id: String,
    },
    /// The server finished the response normally.
    Completed {
        /// Model the server reports actually produced the response.
        model: Option<String>,
    },
    /// The server failed after committing to the stream.
    Error {
        /// Server-provided description.
        message: String,
    },
}

/// Raw payload shape shared by stream records and the single-object
/// response body of non-streaming requests.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RecordPayload {
    #[serde(rename = "type")]
    pub(crate) kind: Option<String>,
    pub(crate) content: Option<String>,
    pub(crate) session_id: Option<String>,
    pub(crate) model: Option<String>,
    pub(crate) error: Option<String>,
    data: Option<Box<RecordPayload>>,
}

impl RecordPayload {
    /// Merge the one permitted level of `data` nesting into the top
    /// level. Top-level fields win.
    pub(crate) fn flattened(mut self) -> Self {
        if let Some(data) = self.data.take() {
            let data = *data;
            self.kind = self.kind.or(data.kind);
            self.content = self.content.or(data.content);
            self.session_id = self.session_id.or(data.session_id);
            self.model = self.model.or(data.model);
            self.error = self.error.or(data.error);
        }
        self
    }
}

/// Parse a non-streaming response body into its payload.
pub(crate) fn parse_body_object(body: &[u8]) -> Option<RecordPayload> {
    match serde_json::from_slice::<RecordPayload>(body) {
        Ok(payload) => Some(payload.flattened()),
        Err(err) => {
            debug!(error = %err, "Unparseable response body");
            None
        }
    }
}

/// Interpret one complete record.
///
/// Returns `None` for every record that does not produce an event;
/// callers just move on to the next record.
#[must_use]
pub fn interpret_record(record: &str) -> Option<StreamEvent> {
    let Some(payload_json) = record.trim_start().strip_prefix(RECORD_PREFIX) else {
        debug!("Record without framing prefix skipped");
        return None;
    };
    let payload = match serde_json::from_str::<RecordPayload>(payload_json.trim()) {
        Ok(payload) => payload.flattened(),
        Err(err) => {
            debug!(error = %err, "Malformed record payload skipped");
            return None;
        }
    };
    event_from_payload(payload)
}

fn event_from_payload(payload: RecordPayload) -> Option<StreamEvent> {
    match payload.kind.as_deref() {
        Some("content") => match payload.content {
            Some(text) => Some(StreamEvent::ContentDelta { text }),
            None => {
                debug!("Content record without content field skipped");
                None
            }
        },
        Some("session") => match payload.session_id {
            Some(session_id) => Some(StreamEvent::SessionAssigned { session_id }),
            None => {
                debug!("Session record without session_id field skipped");
                None
            }
        },
        Some("done") => Some(StreamEvent::Completed {
            model: payload.model,
        }),
        Some("error") => Some(StreamEvent::Error {
            message: payload
                .error
                .unwrap_or_else(|| "unspecified server error".to_string()),
        }),
        Some(other) => {
            debug!(kind = other, "Unrecognized record type skipped");
            None
        }
        None => {
            debug!("Record payload without type discriminator skipped");
            None
        }
    }
}
