//! Conversation facade.
//!
//! Ties the transport, conversation history, session tracker,
//! accumulator, lifecycle, and fallback orchestration into the one
//! object a surface holds. Surfaces construct it with a transport, a
//! config, and the sending half of their update channel, then drive it
//! with [`send_message`](Conversation::send_message) and the returned
//! handles.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::accumulator::MessageAccumulator;
use crate::config::ClientConfig;
use crate::fallback::{ConversationBusy, FallbackOrchestrator};
use crate::lifecycle::{ChatHandle, RequestLifecycle};
use crate::session::{ConversationSession, Message, SessionStore, SessionTracker};
use crate::transport::CompletionTransport;
use crate::update::ChatUpdate;

/// One conversation against the completion endpoint.
///
/// Holds the append-only history and the adopted session id. A prior
/// session id is restored from storage at construction, so a new
/// process resumes the server-side conversation it left off.
pub struct Conversation<T> {
    config: Arc<ClientConfig>,
    session: Arc<Mutex<ConversationSession>>,
    tracker: Arc<Mutex<SessionTracker>>,
    orchestrator: FallbackOrchestrator<T>,
}

impl<T: CompletionTransport + 'static> Conversation<T> {
    /// Wire up a conversation. `updates` is the sending half of the
    /// channel the surface consumes.
    pub fn new(transport: T, config: ClientConfig, updates: mpsc::Sender<ChatUpdate>) -> Self {
        let config = Arc::new(config);
        let session = Arc::new(Mutex::new(ConversationSession::new()));

        let mut tracker = match config.session_path() {
            Some(path) => SessionTracker::with_store(SessionStore::at(path)),
            None => SessionTracker::new(),
        };
        match tracker.restore() {
            Ok(true) => {
                info!(session_id = ?tracker.current(), "Resumed a persisted session");
            }
            Ok(false) => {}
            Err(err) => warn!(error = %err, "Could not restore a persisted session id"),
        }
        let tracker = Arc::new(Mutex::new(tracker));

        let accumulator = MessageAccumulator::new(Arc::clone(&session), updates.clone());
        let lifecycle = RequestLifecycle::new(
            Arc::new(transport),
            Arc::clone(&config),
            Arc::clone(&tracker),
            accumulator,
            updates.clone(),
        );
        let orchestrator = FallbackOrchestrator::new(lifecycle, Arc::clone(&session), updates);

        Self {
            config,
            session,
            tracker,
            orchestrator,
        }
    }

    /// Send a user message and stream the reply.
    ///
    /// Returns a handle that cancels the whole exchange, including a
    /// fallback continuation. Content, session assignment, and the
    /// terminal outcome arrive on the update channel.
    pub fn send_message(&self, text: impl Into<String>) -> Result<ChatHandle, ConversationBusy> {
        self.orchestrator.execute(
            Message::user(text),
            self.config.primary.clone(),
            self.config.secondary.clone(),
        )
    }

    /// Whether an exchange is currently in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.orchestrator.is_busy()
    }

    /// Snapshot of the conversation history.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.session.lock().messages().to_vec()
    }

    /// The adopted session id, if the server has assigned one.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.tracker.lock().current().map(str::to_string)
    }

    /// The configuration this conversation runs with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}
