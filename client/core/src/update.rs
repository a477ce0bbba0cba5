//! Consumer-facing notifications.
//!
//! The conversation pushes updates over a bounded mpsc channel the
//! caller owns. Every `Delta` carries the full current content rather
//! than a diff, so a consumer that coalesces a burst can render only
//! the newest update and still show exactly the accumulated text. The
//! terminal update always carries the final message state; coalescing
//! may drop intermediates, never the final value.

use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::session::{Message, MessageId};

/// One notification to the conversation's consumer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ChatUpdate {
    /// The open assistant message grew.
    Delta {
        /// Message being streamed.
        message_id: MessageId,
        /// Full content accumulated so far, not a fragment.
        content: String,
    },
    /// The server assigned a session id. Emitted at most once per
    /// conversation.
    SessionAssigned {
        /// The adopted session id.
        session_id: String,
    },
    /// The exchange reached a terminal state. Emitted exactly once per
    /// accepted send.
    Terminal {
        /// How the exchange ended.
        outcome: TerminalOutcome,
    },
}

/// Terminal result of one logical exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TerminalOutcome {
    /// The response arrived in full.
    Delivered {
        /// The closed assistant message.
        message: Message,
    },
    /// The user stopped the response.
    Cancelled {
        /// Partial message, when cancellation landed after content
        /// started arriving.
        message: Option<Message>,
    },
    /// The exchange failed.
    Failed {
        /// Classified failure.
        error: ChatError,
        /// Partial message, when the failure landed mid-stream. Its
        /// state marks the content as truncated.
        message: Option<Message>,
    },
}

impl TerminalOutcome {
    /// Whether the exchange delivered a complete response.
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    /// The message this outcome closed, in any state.
    #[must_use]
    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::Delivered { message } => Some(message),
            Self::Cancelled { message } | Self::Failed { message, .. } => message.as_ref(),
        }
    }
}
