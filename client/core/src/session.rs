//! Conversation state and session identity.
//!
//! # Design Philosophy
//!
//! The server owns conversational memory. It assigns a session id on
//! the first response and replays context from it on later requests,
//! so the client's responsibilities stay narrow: adopt the first id
//! offered and never let a later one displace it, reuse it on every
//! request, and keep it across restarts. The local message list exists
//! for display and inspection; it is append-only, with exactly one
//! assistant message open for mutation at a time.
//!
//! Message content is only mutable while the message is streaming.
//! Once a message reaches a terminal state its content is frozen, and
//! late appends are refused where the mutation would happen rather
//! than trusting every caller to check first.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Fixed filename for the persisted session document.
pub const SESSION_FILE_NAME: &str = "session.json";

// ============================================================================
// Messages
// ============================================================================

/// Unique client-generated message identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who authored a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The human driving the conversation.
    User,
    /// The model answering.
    Assistant,
}

/// Lifecycle state of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    /// Still receiving content.
    Streaming,
    /// Complete; the response arrived in full.
    Delivered,
    /// Stopped by the user; content is the partial received so far.
    Stopped,
    /// The attempt failed; content is the truncated partial.
    Failed,
}

impl MessageState {
    /// Whether the state admits no further content changes.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Streaming)
    }
}

/// A message in the visible conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id.
    pub id: MessageId,
    /// Who authored it.
    pub role: MessageRole,
    /// Message text. Grows while streaming, frozen once terminal.
    pub content: String,
    /// `service/model` that produced it. Assistant messages only, set
    /// when the message closes as delivered.
    pub provider_label: Option<String>,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Current lifecycle state.
    pub state: MessageState,
}

impl Message {
    /// Create a user message, complete at birth.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: MessageRole::User,
            content: content.into(),
            provider_label: None,
            timestamp: Utc::now(),
            state: MessageState::Delivered,
        }
    }

    /// Create an empty assistant message open for streaming.
    #[must_use]
    pub fn assistant_streaming(id: MessageId) -> Self {
        Self {
            id,
            role: MessageRole::Assistant,
            content: String::new(),
            provider_label: None,
            timestamp: Utc::now(),
            state: MessageState::Streaming,
        }
    }

    /// Whether this message is still receiving content.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == MessageState::Streaming
    }
}

// ============================================================================
// Conversation history
// ============================================================================

/// Append-only conversation history with a single open slot.
///
/// At most one assistant message is open at a time; `open_assistant`
/// refuses a second. All mutation goes through the open slot, so a
/// message that has reached a terminal state can never change again.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConversationSession {
    messages: Vec<Message>,
    open_id: Option<MessageId>,
}

impl ConversationSession {
    /// Create an empty conversation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a completed message (typically the user's input).
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Open an assistant message for streaming.
    ///
    /// Returns `false` without touching state when another message is
    /// already open.
    pub fn open_assistant(&mut self, id: MessageId) -> bool {
        if let Some(open) = &self.open_id {
            warn!(open = %open, rejected = %id, "Refusing a second open assistant message");
            return false;
        }
        self.messages.push(Message::assistant_streaming(id.clone()));
        self.open_id = Some(id);
        true
    }

    /// Append text to the open message.
    ///
    /// Returns the full content after the append, or `None` when `id`
    /// is not the open message (already closed, or never opened). The
    /// `None` case changes nothing.
    pub fn append_open(&mut self, id: &MessageId, text: &str) -> Option<String> {
        if self.open_id.as_ref() != Some(id) {
            return None;
        }
        let message = self.messages.iter_mut().rev().find(|m| &m.id == id)?;
        message.content.push_str(text);
        Some(message.content.clone())
    }

    /// Close the open message into a terminal state.
    ///
    /// Returns the closed message, or `None` when `id` is not the open
    /// message. `provider_label` is recorded as given; cancelled and
    /// failed closes pass `None`.
    pub fn close_open(
        &mut self,
        id: &MessageId,
        state: MessageState,
        provider_label: Option<String>,
    ) -> Option<Message> {
        if !state.is_terminal() {
            warn!(state = ?state, "Refusing to close a message into a non-terminal state");
            return None;
        }
        if self.open_id.as_ref() != Some(id) {
            return None;
        }
        self.open_id = None;
        let message = self.messages.iter_mut().rev().find(|m| &m.id == id)?;
        message.state = state;
        message.provider_label = provider_label;
        debug!(message_id = %id, state = ?state, chars = message.content.len(), "Assistant message closed");
        Some(message.clone())
    }

    /// Id of the currently open message, if any.
    #[must_use]
    pub fn open_message_id(&self) -> Option<&MessageId> {
        self.open_id.as_ref()
    }

    /// Whether an assistant message is currently streaming.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.open_id.is_some()
    }

    /// All messages in arrival order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Look up a message by id.
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// The most recent message, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

// ============================================================================
// Session identity
// ============================================================================

/// Holds the server-assigned session id. First write wins.
///
/// The id is adopted from the first response that offers one and then
/// never replaced or cleared for the lifetime of the conversation;
/// later offers are ignored so concurrent or duplicated session events
/// cannot fork the conversation's identity.
#[derive(Debug, Default)]
pub struct SessionTracker {
    current: Option<String>,
    store: Option<SessionStore>,
}

impl SessionTracker {
    /// Tracker with no persistence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker that persists through the given store.
    #[must_use]
    pub fn with_store(store: SessionStore) -> Self {
        Self {
            current: None,
            store: Some(store),
        }
    }

    /// Adopt a session id unless one is already held.
    ///
    /// Returns `true` only for the adopting call; repeats and later
    /// offers return `false` and change nothing.
    pub fn adopt_if_unset(&mut self, session_id: &str) -> bool {
        if let Some(current) = &self.current {
            if current != session_id {
                debug!(current = %current, offered = %session_id, "Ignoring later session id offer");
            }
            return false;
        }
        debug!(session_id = %session_id, "Session id adopted");
        self.current = Some(session_id.to_string());
        true
    }

    /// The held session id, if one has been adopted.
    #[must_use]
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Write the held id through the store, if both exist.
    pub fn persist(&self) -> Result<(), SessionStoreError> {
        match (&self.store, &self.current) {
            (Some(store), Some(session_id)) => store.save(session_id),
            _ => Ok(()),
        }
    }

    /// Load a previously persisted id, unless one is already held.
    ///
    /// Returns `true` when an id was restored.
    pub fn restore(&mut self) -> Result<bool, SessionStoreError> {
        if self.current.is_some() {
            return Ok(false);
        }
        let Some(store) = &self.store else {
            return Ok(false);
        };
        match store.load()? {
            Some(session_id) => {
                debug!(session_id = %session_id, "Restored persisted session id");
                self.current = Some(session_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ============================================================================
// Session storage
// ============================================================================

/// Errors from the session id store.
#[derive(Debug, Error)]
pub enum SessionStoreError {
    /// Filesystem failure while reading or writing the document.
    #[error("session store io error at {path}: {source}")]
    Io {
        /// Store path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The document existed but did not hold a session id.
    #[error("session store at {path} held malformed data: {detail}")]
    Malformed {
        /// Store path.
        path: PathBuf,
        /// Parse failure detail.
        detail: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionDocument {
    session_id: String,
}

/// Durable storage for the session id, one small JSON document at a
/// fixed path.
#[derive(Clone, Debug)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Store backed by the given file.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location under the XDG data dir.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_local_dir().map(|dir| dir.join("chatkit").join(SESSION_FILE_NAME))
    }

    /// The backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the session id, creating parent directories as needed.
    pub fn save(&self, session_id: &str) -> Result<(), SessionStoreError> {
        let io_err = |source| SessionStoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let document = SessionDocument {
            session_id: session_id.to_string(),
        };
        let json = serde_json::to_string_pretty(&document).map_err(|err| {
            SessionStoreError::Malformed {
                path: self.path.clone(),
                detail: err.to_string(),
            }
        })?;
        std::fs::write(&self.path, json).map_err(io_err)?;
        debug!(path = ?self.path, "Session id persisted");
        Ok(())
    }

    /// Read the stored session id. A missing file is `Ok(None)`.
    pub fn load(&self) -> Result<Option<String>, SessionStoreError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SessionStoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let document: SessionDocument =
            serde_json::from_str(&text).map_err(|err| SessionStoreError::Malformed {
                path: self.path.clone(),
                detail: err.to_string(),
            })?;
        Ok(Some(document.session_id))
    }
}
