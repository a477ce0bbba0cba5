//! Attempt lifecycle: dispatch, stream pumping, cancellation.
//!
//! [`RequestLifecycle::send`] issues one provider-bound attempt and
//! returns a cancellable [`ChatHandle`]. A spawned pump drives the
//! response body through the frame decoder and event interpreter and
//! routes the typed events:
//!
//! ```text
//! transport chunks ──► FrameDecoder ──► interpret_record ──┬─► ContentDelta ──► accumulator
//!                                                          ├─► SessionAssigned ──► tracker
//!                                                          ├─► Completed ──► close(delivered)
//!                                                          └─► Error ──► close(failed)
//! ```
//!
//! Everything between two awaited chunk reads is synchronous, so deltas
//! land in receipt order. The pump suspends only on the chunk read, the
//! consumer channel, and the cancel/deadline branches of its select
//! loop. The deadline is anchored when the request is issued and covers
//! both the wait for the response and the whole body, one clock for the
//! entire attempt.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::accumulator::MessageAccumulator;
use crate::config::{ClientConfig, ProviderTarget};
use crate::error::{error_message_from_body, ChatError};
use crate::session::{Message, MessageId, SessionTracker};
use crate::transport::{ByteStream, CompletionRequest, CompletionTransport, TransportError};
use crate::update::{ChatUpdate, TerminalOutcome};
use crate::wire::event::{interpret_record, parse_body_object, StreamEvent};
use crate::wire::frame::FrameDecoder;

/// Cap on a buffered error body. Only a short JSON detail is expected.
const ERROR_BODY_LIMIT: usize = 64 * 1024;

/// Cap on a buffered non-streaming response body.
const SINGLE_BODY_LIMIT: usize = 4 * 1024 * 1024;

/// One provider-bound try at answering a user message.
#[derive(Clone, Debug)]
pub struct RequestAttempt {
    /// Provider service and model this attempt targets.
    pub provider: ProviderTarget,
    /// The user message being answered.
    pub input: Message,
    /// 1 for the primary attempt, 2 for a fallback continuation.
    pub attempt_number: u32,
    /// Visible prefix seeded into the reply when this attempt is a
    /// degraded continuation on a standby provider.
    pub content_prefix: Option<String>,
}

impl RequestAttempt {
    /// A primary attempt.
    #[must_use]
    pub fn new(provider: ProviderTarget, input: Message) -> Self {
        Self {
            provider,
            input,
            attempt_number: 1,
            content_prefix: None,
        }
    }

    /// A fallback continuation on a standby provider.
    #[must_use]
    pub fn continuation(provider: ProviderTarget, input: Message, content_prefix: String) -> Self {
        Self {
            provider,
            input,
            attempt_number: 2,
            content_prefix: Some(content_prefix),
        }
    }

    /// Label recorded on the delivered message. When the final record
    /// echoed the model that actually answered, that echo wins over the
    /// requested model.
    #[must_use]
    pub fn provider_label(&self, wire_model: Option<&str>) -> String {
        match wire_model {
            Some(model) => format!("{}/{}", self.provider.service, model),
            None => self.provider.label(),
        }
    }
}

/// Cancellable handle for one in-flight exchange.
#[derive(Debug)]
pub struct ChatHandle {
    cancel: CancellationToken,
    outcome: JoinHandle<TerminalOutcome>,
}

impl ChatHandle {
    pub(crate) fn new(cancel: CancellationToken, outcome: JoinHandle<TerminalOutcome>) -> Self {
        Self { cancel, outcome }
    }

    /// Request cooperative cancellation.
    ///
    /// Safe from any state: before the first byte, mid-stream, after
    /// completion, or repeatedly. Partial content already accumulated
    /// stays in the conversation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the exchange already reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.outcome.is_finished()
    }

    /// Wait for the terminal outcome.
    pub async fn join(self) -> TerminalOutcome {
        match self.outcome.await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "Exchange task did not run to completion");
                TerminalOutcome::Failed {
                    error: ChatError::StreamFailure {
                        message: format!("exchange task failed: {err}"),
                    },
                    message: None,
                }
            }
        }
    }
}

/// Issues attempts and pumps their response streams.
///
/// The outcome of an attempt is reported through its [`ChatHandle`];
/// the conversation layer forwards it to the update channel, so the
/// lifecycle itself only ever emits deltas and session assignment.
pub struct RequestLifecycle<T> {
    transport: Arc<T>,
    config: Arc<ClientConfig>,
    tracker: Arc<Mutex<SessionTracker>>,
    accumulator: MessageAccumulator,
    updates: mpsc::Sender<ChatUpdate>,
}

impl<T: CompletionTransport + 'static> RequestLifecycle<T> {
    /// Wire up a lifecycle over shared conversation state.
    #[must_use]
    pub fn new(
        transport: Arc<T>,
        config: Arc<ClientConfig>,
        tracker: Arc<Mutex<SessionTracker>>,
        accumulator: MessageAccumulator,
        updates: mpsc::Sender<ChatUpdate>,
    ) -> Self {
        Self {
            transport,
            config,
            tracker,
            accumulator,
            updates,
        }
    }

    /// Issue one attempt with a fresh cancellation token.
    pub fn send(&self, attempt: RequestAttempt) -> ChatHandle {
        self.send_with_token(attempt, CancellationToken::new())
    }

    /// Issue one attempt cancelled through the given token. The
    /// orchestrator passes child tokens so one cancel covers every
    /// attempt of an exchange.
    pub(crate) fn send_with_token(
        &self,
        attempt: RequestAttempt,
        cancel: CancellationToken,
    ) -> ChatHandle {
        let pump = AttemptPump {
            transport: Arc::clone(&self.transport),
            config: Arc::clone(&self.config),
            tracker: Arc::clone(&self.tracker),
            accumulator: self.accumulator.clone(),
            updates: self.updates.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(pump.run(attempt));
        ChatHandle::new(cancel, task)
    }
}

/// Owned state for one spawned attempt.
struct AttemptPump<T> {
    transport: Arc<T>,
    config: Arc<ClientConfig>,
    tracker: Arc<Mutex<SessionTracker>>,
    accumulator: MessageAccumulator,
    updates: mpsc::Sender<ChatUpdate>,
    cancel: CancellationToken,
}

/// What one applied record means for the pump loop.
enum RecordFlow {
    Continue,
    Finished(TerminalOutcome),
}

/// How a buffered body read ended.
enum BodyRead {
    Complete(Vec<u8>),
    Cancelled,
    TimedOut,
    Failed(TransportError, Vec<u8>),
}

impl<T: CompletionTransport + 'static> AttemptPump<T> {
    async fn run(self, attempt: RequestAttempt) -> TerminalOutcome {
        let deadline = Instant::now() + self.config.request_timeout;
        let request = self.build_request(&attempt);
        debug!(
            transport = self.transport.name(),
            provider = %attempt.provider.label(),
            attempt = attempt.attempt_number,
            streaming = request.stream,
            "Issuing completion attempt"
        );

        let reply = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                debug!(attempt = attempt.attempt_number, "Cancelled before a response arrived");
                return TerminalOutcome::Cancelled { message: None };
            }
            reply = timeout_at(deadline, self.transport.execute(&request)) => match reply {
                Ok(Ok(reply)) => reply,
                Ok(Err(err)) => {
                    warn!(error = %err, "Transport failed before a response arrived");
                    return TerminalOutcome::Failed {
                        error: transport_failure(err, &self.config),
                        message: None,
                    };
                }
                Err(_) => {
                    warn!(timeout = ?self.config.request_timeout, "No response within the deadline");
                    return TerminalOutcome::Failed {
                        error: ChatError::Timeout {
                            elapsed: self.config.request_timeout,
                        },
                        message: None,
                    };
                }
            },
        };

        if !reply.status.is_success() {
            return self
                .classify_failure(reply.status.as_u16(), reply.retry_after, reply.body, deadline)
                .await;
        }

        if request.stream {
            self.pump_stream(&attempt, reply.body, deadline).await
        } else {
            self.consume_single(&attempt, reply.body, deadline).await
        }
    }

    fn build_request(&self, attempt: &RequestAttempt) -> CompletionRequest {
        CompletionRequest {
            message: attempt.input.content.clone(),
            service: attempt.provider.service.clone(),
            model: attempt.provider.model.clone(),
            temperature: self.config.temperature,
            session_id: self.tracker.lock().current().map(str::to_string),
            stream: self.config.streaming,
        }
    }

    /// Classify a non-success status, enriching it with whatever error
    /// body can be read before the deadline. No message is opened; the
    /// conversation shows nothing for an attempt that died here.
    async fn classify_failure(
        &self,
        status: u16,
        retry_after: Option<Duration>,
        mut body: ByteStream,
        deadline: Instant,
    ) -> TerminalOutcome {
        let detail = match read_body(&mut body, deadline, &self.cancel, ERROR_BODY_LIMIT).await {
            BodyRead::Cancelled => return TerminalOutcome::Cancelled { message: None },
            BodyRead::Complete(bytes) | BodyRead::Failed(_, bytes) => error_message_from_body(&bytes),
            BodyRead::TimedOut => None,
        };
        let error = ChatError::from_status(status, retry_after, detail);
        warn!(status = status, error = %error, "Completion attempt rejected");
        TerminalOutcome::Failed {
            error,
            message: None,
        }
    }

    /// Drive a streaming body to its terminal state.
    async fn pump_stream(
        &self,
        attempt: &RequestAttempt,
        mut body: ByteStream,
        deadline: Instant,
    ) -> TerminalOutcome {
        let message_id = MessageId::new();
        if !self.accumulator.open(&message_id) {
            return TerminalOutcome::Failed {
                error: ChatError::StreamFailure {
                    message: "another response is still open for this conversation".to_string(),
                },
                message: None,
            };
        }
        if let Some(prefix) = &attempt.content_prefix {
            if !self.accumulator.append(&message_id, prefix).await {
                return TerminalOutcome::Cancelled {
                    message: self.accumulator.stop(&message_id),
                };
            }
        }

        let mut decoder = FrameDecoder::new();
        loop {
            let chunk = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!(message_id = %message_id, "Cancel observed, stopping the stream");
                    return TerminalOutcome::Cancelled {
                        message: self.accumulator.stop(&message_id),
                    };
                }
                () = sleep_until(deadline) => {
                    warn!(message_id = %message_id, timeout = ?self.config.request_timeout, "Deadline elapsed mid-stream");
                    return TerminalOutcome::Failed {
                        error: ChatError::Timeout {
                            elapsed: self.config.request_timeout,
                        },
                        message: self.accumulator.stop(&message_id),
                    };
                }
                chunk = body.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    decoder.feed(&bytes);
                    while let Some(record) = decoder.next_record() {
                        match self.apply_record(attempt, &message_id, &record).await {
                            RecordFlow::Continue => {}
                            RecordFlow::Finished(outcome) => return outcome,
                        }
                    }
                }
                Some(Err(err)) => {
                    warn!(error = %err, message_id = %message_id, "Body read failed mid-stream");
                    return TerminalOutcome::Failed {
                        error: transport_failure(err, &self.config),
                        message: self.accumulator.fail(&message_id),
                    };
                }
                None => {
                    // Transport end without a done record still completes
                    // the message; the tail may hold one final record.
                    if let Some(record) = decoder.finish() {
                        if let RecordFlow::Finished(outcome) =
                            self.apply_record(attempt, &message_id, &record).await
                        {
                            return outcome;
                        }
                    }
                    debug!(message_id = %message_id, "Stream ended without a done record, closing as delivered");
                    let label = attempt.provider_label(None);
                    return delivered(self.accumulator.complete(&message_id, label));
                }
            }
        }
    }

    /// Route one record's event. Unrecognized or malformed records fall
    /// through as `Continue`.
    async fn apply_record(
        &self,
        attempt: &RequestAttempt,
        message_id: &MessageId,
        record: &str,
    ) -> RecordFlow {
        let Some(event) = interpret_record(record) else {
            return RecordFlow::Continue;
        };
        match event {
            StreamEvent::ContentDelta { text } => {
                if self.accumulator.append(message_id, &text).await {
                    RecordFlow::Continue
                } else {
                    RecordFlow::Finished(TerminalOutcome::Cancelled {
                        message: self.accumulator.stop(message_id),
                    })
                }
            }
            StreamEvent::SessionAssigned { session_id } => {
                self.adopt_session(&session_id).await;
                RecordFlow::Continue
            }
            StreamEvent::Completed { model } => {
                let label = attempt.provider_label(model.as_deref());
                RecordFlow::Finished(delivered(self.accumulator.complete(message_id, label)))
            }
            StreamEvent::Error { message } => {
                warn!(error = %message, message_id = %message_id, "Server reported a mid-stream failure");
                RecordFlow::Finished(TerminalOutcome::Failed {
                    error: ChatError::StreamFailure { message },
                    message: self.accumulator.fail(message_id),
                })
            }
        }
    }

    /// Adopt a session id offer. Only the adopting call persists and
    /// notifies; repeats and later offers are silent.
    async fn adopt_session(&self, session_id: &str) {
        let persisted = {
            let mut tracker = self.tracker.lock();
            if !tracker.adopt_if_unset(session_id) {
                return;
            }
            tracker.persist()
        };
        if let Err(err) = persisted {
            warn!(error = %err, "Failed to persist the adopted session id");
        }
        let _ = self
            .updates
            .send(ChatUpdate::SessionAssigned {
                session_id: session_id.to_string(),
            })
            .await;
    }

    /// Consume a non-streaming response: one JSON object, delivered as
    /// a single delta.
    async fn consume_single(
        &self,
        attempt: &RequestAttempt,
        mut body: ByteStream,
        deadline: Instant,
    ) -> TerminalOutcome {
        let bytes = match read_body(&mut body, deadline, &self.cancel, SINGLE_BODY_LIMIT).await {
            BodyRead::Complete(bytes) => bytes,
            BodyRead::Cancelled => return TerminalOutcome::Cancelled { message: None },
            BodyRead::TimedOut => {
                return TerminalOutcome::Failed {
                    error: ChatError::Timeout {
                        elapsed: self.config.request_timeout,
                    },
                    message: None,
                }
            }
            BodyRead::Failed(err, _) => {
                return TerminalOutcome::Failed {
                    error: transport_failure(err, &self.config),
                    message: None,
                }
            }
        };

        let Some(payload) = parse_body_object(&bytes) else {
            return TerminalOutcome::Failed {
                error: ChatError::Api {
                    code: 200,
                    message: "malformed completion response body".to_string(),
                },
                message: None,
            };
        };
        if let Some(detail) = payload.error {
            return TerminalOutcome::Failed {
                error: ChatError::Api {
                    code: 200,
                    message: detail,
                },
                message: None,
            };
        }
        if let Some(session_id) = payload.session_id.as_deref() {
            self.adopt_session(session_id).await;
        }

        let message_id = MessageId::new();
        if !self.accumulator.open(&message_id) {
            return TerminalOutcome::Failed {
                error: ChatError::StreamFailure {
                    message: "another response is still open for this conversation".to_string(),
                },
                message: None,
            };
        }
        let mut full = attempt.content_prefix.clone().unwrap_or_default();
        full.push_str(payload.content.as_deref().unwrap_or_default());
        if !self.accumulator.append(&message_id, &full).await {
            return TerminalOutcome::Cancelled {
                message: self.accumulator.stop(&message_id),
            };
        }
        let label = attempt.provider_label(payload.model.as_deref());
        delivered(self.accumulator.complete(&message_id, label))
    }
}

/// Collect a body under the attempt deadline and cancel token, capped
/// at `limit` bytes.
async fn read_body(
    body: &mut ByteStream,
    deadline: Instant,
    cancel: &CancellationToken,
    limit: usize,
) -> BodyRead {
    let mut collected = Vec::new();
    loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => return BodyRead::Cancelled,
            () = sleep_until(deadline) => return BodyRead::TimedOut,
            chunk = body.next() => chunk,
        };
        match chunk {
            Some(Ok(bytes)) => {
                collected.extend_from_slice(&bytes);
                if collected.len() > limit {
                    warn!(limit = limit, "Response body exceeded buffer cap, truncating");
                    collected.truncate(limit);
                    return BodyRead::Complete(collected);
                }
            }
            Some(Err(err)) => return BodyRead::Failed(err, collected),
            None => return BodyRead::Complete(collected),
        }
    }
}

fn transport_failure(err: TransportError, config: &ClientConfig) -> ChatError {
    match err {
        TransportError::TimedOut => ChatError::Timeout {
            elapsed: config.request_timeout,
        },
        TransportError::Connect(message)
        | TransportError::Read(message)
        | TransportError::Setup(message) => ChatError::Connection { message },
    }
}

fn delivered(message: Option<Message>) -> TerminalOutcome {
    match message {
        Some(message) => TerminalOutcome::Delivered { message },
        None => TerminalOutcome::Failed {
            error: ChatError::StreamFailure {
                message: "response completed without an open message".to_string(),
            },
            message: None,
        },
    }
}
