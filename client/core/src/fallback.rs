//! Single-hop provider fallback.
//!
//! ```text
//! attempt(primary) ── delivered/cancelled ─────────────► done
//!     │
//!     ├── rate limited ──► attempt(secondary) ── ok ───► done (degraded label)
//!     │                        │
//!     │                        └── any failure ───────► Failed(primary's error)
//!     │
//!     └── any other failure ─────────────────────────► Failed
//! ```
//!
//! Fallback is exactly one hop and only a rate limit arms it. The
//! standby provider gets no retry of its own, and when it also fails
//! the user sees the original rate limit; the secondary's failure goes
//! to the log. Authentication, quota, and the rest fail fast because a
//! second provider cannot fix them and a retry would double the damage
//! of a misconfigured account.
//!
//! The orchestrator also owns the exchange latch (one in-flight
//! exchange per conversation) and is the single place that emits the
//! terminal update, so a fallback continuation can never produce two
//! terminal notifications.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProviderTarget;
use crate::lifecycle::{ChatHandle, RequestAttempt, RequestLifecycle};
use crate::session::{ConversationSession, Message};
use crate::transport::CompletionTransport;
use crate::update::{ChatUpdate, TerminalOutcome};

/// Rejection returned while another exchange is still in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConversationBusy;

impl fmt::Display for ConversationBusy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a response is already streaming for this conversation")
    }
}

impl std::error::Error for ConversationBusy {}

/// Visible prefix seeded into a reply produced on the standby provider.
#[must_use]
pub fn fallback_notice(target: &ProviderTarget) -> String {
    format!("[via fallback {}] ", target.label())
}

/// Runs the primary attempt and, for rate limiting only, one standby
/// attempt. The external contract is the same as a plain send: one
/// handle, one terminal update.
pub struct FallbackOrchestrator<T> {
    lifecycle: Arc<RequestLifecycle<T>>,
    session: Arc<Mutex<ConversationSession>>,
    updates: mpsc::Sender<ChatUpdate>,
    active: Arc<AtomicBool>,
}

impl<T: CompletionTransport + 'static> FallbackOrchestrator<T> {
    /// Wire up an orchestrator over the lifecycle and shared history.
    #[must_use]
    pub fn new(
        lifecycle: RequestLifecycle<T>,
        session: Arc<Mutex<ConversationSession>>,
        updates: mpsc::Sender<ChatUpdate>,
    ) -> Self {
        Self {
            lifecycle: Arc::new(lifecycle),
            session,
            updates,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Record `input` in the conversation and run the exchange.
    ///
    /// Rejected without side effects when an exchange is already in
    /// flight. The returned handle cancels every attempt of the
    /// exchange; the terminal update is emitted exactly once, here.
    pub fn execute(
        &self,
        input: Message,
        primary: ProviderTarget,
        secondary: Option<ProviderTarget>,
    ) -> Result<ChatHandle, ConversationBusy> {
        let Some(guard) = ExchangeGuard::acquire(&self.active) else {
            debug!("Exchange rejected, another response is in flight");
            return Err(ConversationBusy);
        };
        self.session.lock().push(input.clone());

        let cancel = CancellationToken::new();
        let lifecycle = Arc::clone(&self.lifecycle);
        let updates = self.updates.clone();
        let exchange_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            let outcome =
                run_exchange(&lifecycle, &exchange_cancel, input, primary, secondary).await;
            if updates
                .send(ChatUpdate::Terminal {
                    outcome: outcome.clone(),
                })
                .await
                .is_err()
            {
                debug!("Update consumer gone before the terminal notification");
            }
            outcome
        });
        Ok(ChatHandle::new(cancel, task))
    }

    /// Whether an exchange is currently in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

async fn run_exchange<T: CompletionTransport + 'static>(
    lifecycle: &RequestLifecycle<T>,
    cancel: &CancellationToken,
    input: Message,
    primary: ProviderTarget,
    secondary: Option<ProviderTarget>,
) -> TerminalOutcome {
    let first = RequestAttempt::new(primary.clone(), input.clone());
    let outcome = lifecycle
        .send_with_token(first, cancel.child_token())
        .join()
        .await;

    let TerminalOutcome::Failed { error, message } = outcome else {
        return outcome;
    };
    if !error.is_rate_limited() {
        return TerminalOutcome::Failed { error, message };
    }
    let Some(standby) = secondary else {
        debug!("Rate limited with no standby provider configured");
        return TerminalOutcome::Failed { error, message };
    };
    if cancel.is_cancelled() {
        return TerminalOutcome::Cancelled { message: None };
    }

    info!(
        from = %primary.label(),
        to = %standby.label(),
        retry_after = ?error.retry_after(),
        "Rate limited, continuing on the standby provider"
    );
    let notice = fallback_notice(&standby);
    let second = RequestAttempt::continuation(standby, input, notice);
    match lifecycle
        .send_with_token(second, cancel.child_token())
        .join()
        .await
    {
        TerminalOutcome::Failed {
            error: standby_error,
            message: standby_message,
        } => {
            warn!(error = %standby_error, "Standby attempt failed, surfacing the original rate limit");
            TerminalOutcome::Failed {
                error,
                message: standby_message.or(message),
            }
        }
        delivered_or_cancelled => delivered_or_cancelled,
    }
}

/// Clears the in-flight latch when the exchange task ends, on every
/// path out of it.
struct ExchangeGuard {
    active: Arc<AtomicBool>,
}

impl ExchangeGuard {
    fn acquire(active: &Arc<AtomicBool>) -> Option<Self> {
        active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
            .then(|| Self {
                active: Arc::clone(active),
            })
    }
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}
