//! In-flight message accumulation and delta notification.
//!
//! One accumulator serves one conversation. `open` creates the assistant
//! message, `append` extends it and pushes the full-content snapshot to
//! the consumer, and exactly one of `complete`, `stop`, or `fail`
//! closes it. Snapshots go out in append order, at least once each; an
//! append against a closed message is refused by the session layer and
//! reported here without corrupting anything.
//!
//! The session lock is held only for the synchronous mutation. The
//! channel send happens after the lock is released, so a slow consumer
//! backpressures the stream pump without blocking readers of the
//! conversation.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::session::{ConversationSession, Message, MessageId, MessageState};
use crate::update::ChatUpdate;

/// Accumulates streamed deltas into the conversation's open assistant
/// message and notifies the consumer.
#[derive(Clone)]
pub struct MessageAccumulator {
    session: Arc<Mutex<ConversationSession>>,
    updates: mpsc::Sender<ChatUpdate>,
}

impl MessageAccumulator {
    /// Create an accumulator over the shared conversation state.
    #[must_use]
    pub fn new(session: Arc<Mutex<ConversationSession>>, updates: mpsc::Sender<ChatUpdate>) -> Self {
        Self { session, updates }
    }

    /// Open an assistant message for the exchange.
    ///
    /// Returns `false` when another message is already open.
    pub fn open(&self, id: &MessageId) -> bool {
        self.session.lock().open_assistant(id.clone())
    }

    /// Append text and push the full-content snapshot to the consumer.
    ///
    /// Returns `false` only when the consumer is gone (channel closed),
    /// which callers treat as a stop signal. Appends against a closed
    /// message are logged and otherwise ignored.
    pub async fn append(&self, id: &MessageId, text: &str) -> bool {
        let snapshot = self.session.lock().append_open(id, text);
        let Some(content) = snapshot else {
            warn!(message_id = %id, "Append against a closed message ignored");
            return true;
        };
        let update = ChatUpdate::Delta {
            message_id: id.clone(),
            content,
        };
        if self.updates.send(update).await.is_err() {
            debug!(message_id = %id, "Update consumer gone, signalling stop");
            return false;
        }
        true
    }

    /// Close the message as delivered with its provider label.
    pub fn complete(&self, id: &MessageId, provider_label: String) -> Option<Message> {
        self.close(id, MessageState::Delivered, Some(provider_label))
    }

    /// Close the message as stopped by the user, keeping the partial.
    pub fn stop(&self, id: &MessageId) -> Option<Message> {
        self.close(id, MessageState::Stopped, None)
    }

    /// Close the message as failed, keeping the truncated partial.
    pub fn fail(&self, id: &MessageId) -> Option<Message> {
        self.close(id, MessageState::Failed, None)
    }

    fn close(
        &self,
        id: &MessageId,
        state: MessageState,
        provider_label: Option<String>,
    ) -> Option<Message> {
        let closed = self.session.lock().close_open(id, state, provider_label);
        if closed.is_none() {
            warn!(message_id = %id, state = ?state, "Close against a message that is not open");
        }
        closed
    }
}
