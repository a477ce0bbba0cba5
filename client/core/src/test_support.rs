//! Scripted transports and fixtures shared across the crate's tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::sync::mpsc;

use crate::accumulator::MessageAccumulator;
use crate::config::ClientConfig;
use crate::lifecycle::RequestLifecycle;
use crate::session::{ConversationSession, SessionTracker};
use crate::transport::{
    ByteStream, CompletionRequest, CompletionTransport, TransportError, TransportReply,
};
use crate::update::ChatUpdate;

/// One scripted answer from the mock transport.
pub(crate) enum MockReply {
    /// A response with the whole body in one chunk. Works for error
    /// statuses and for non-streaming 200s alike.
    Status {
        status: u16,
        retry_after: Option<Duration>,
        body: Vec<u8>,
    },
    /// A streaming response with explicit chunks.
    Stream {
        status: u16,
        retry_after: Option<Duration>,
        chunks: Vec<Result<Bytes, TransportError>>,
    },
    /// A streaming response whose body never ends after its chunks.
    StreamThenHang {
        status: u16,
        chunks: Vec<Bytes>,
    },
    /// `execute` never resolves.
    Hang,
    /// `execute` fails outright.
    ConnectError(String),
}

impl MockReply {
    /// A 200 stream from whole-chunk bytes.
    pub(crate) fn stream(chunks: Vec<Bytes>) -> Self {
        Self::Stream {
            status: 200,
            retry_after: None,
            chunks: chunks.into_iter().map(Ok).collect(),
        }
    }

    /// A 200 stream that delivers its chunks and then stays open.
    pub(crate) fn stream_then_hang(chunks: Vec<Bytes>) -> Self {
        Self::StreamThenHang {
            status: 200,
            chunks,
        }
    }
}

/// Transport that answers from a queued script and records every
/// request it was asked to execute.
pub(crate) struct MockTransport {
    replies: Mutex<VecDeque<MockReply>>,
    pub(crate) requests: Mutex<Vec<CompletionRequest>>,
}

impl MockTransport {
    pub(crate) fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl CompletionTransport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, request: &CompletionRequest) -> Result<TransportReply, TransportError> {
        self.requests.lock().push(request.clone());
        let reply = self
            .replies
            .lock()
            .pop_front()
            .expect("mock transport script exhausted");
        match reply {
            MockReply::Status {
                status,
                retry_after,
                body,
            } => {
                let chunks: Vec<Result<Bytes, TransportError>> = vec![Ok(Bytes::from(body))];
                Ok(TransportReply {
                    status: StatusCode::from_u16(status).expect("valid status in script"),
                    retry_after,
                    body: Box::pin(stream::iter(chunks)),
                })
            }
            MockReply::Stream {
                status,
                retry_after,
                chunks,
            } => Ok(TransportReply {
                status: StatusCode::from_u16(status).expect("valid status in script"),
                retry_after,
                body: Box::pin(stream::iter(chunks)),
            }),
            MockReply::StreamThenHang { status, chunks } => {
                let body: ByteStream = Box::pin(
                    stream::iter(chunks.into_iter().map(Ok::<Bytes, TransportError>))
                        .chain(stream::pending()),
                );
                Ok(TransportReply {
                    status: StatusCode::from_u16(status).expect("valid status in script"),
                    retry_after: None,
                    body,
                })
            }
            MockReply::Hang => futures::future::pending().await,
            MockReply::ConnectError(message) => Err(TransportError::Connect(message)),
        }
    }
}

/// Everything a test needs to observe one scripted lifecycle.
pub(crate) struct Fixture {
    pub(crate) transport: Arc<MockTransport>,
    pub(crate) session: Arc<Mutex<ConversationSession>>,
    pub(crate) tracker: Arc<Mutex<SessionTracker>>,
    pub(crate) tx: mpsc::Sender<ChatUpdate>,
    pub(crate) rx: tokio::sync::Mutex<mpsc::Receiver<ChatUpdate>>,
}

/// Scripted lifecycle over the default config.
pub(crate) fn scripted_lifecycle(
    replies: Vec<MockReply>,
) -> (RequestLifecycle<MockTransport>, Fixture) {
    scripted_lifecycle_with(ClientConfig::default(), replies)
}

/// Scripted lifecycle over a custom config. The tracker has no store,
/// so nothing touches the filesystem.
pub(crate) fn scripted_lifecycle_with(
    config: ClientConfig,
    replies: Vec<MockReply>,
) -> (RequestLifecycle<MockTransport>, Fixture) {
    let transport = Arc::new(MockTransport::new(replies));
    let session = Arc::new(Mutex::new(ConversationSession::new()));
    let tracker = Arc::new(Mutex::new(SessionTracker::new()));
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let accumulator = MessageAccumulator::new(Arc::clone(&session), tx.clone());
    let lifecycle = RequestLifecycle::new(
        Arc::clone(&transport),
        Arc::new(config),
        Arc::clone(&tracker),
        accumulator,
        tx.clone(),
    );
    let fixture = Fixture {
        transport,
        session,
        tracker,
        tx,
        rx: tokio::sync::Mutex::new(rx),
    };
    (lifecycle, fixture)
}

/// Chunk bytes for a list of records, newline-terminated.
pub(crate) fn records_chunk(records: &[&str]) -> Bytes {
    let mut text = records.join("\n");
    text.push('\n');
    Bytes::from(text)
}

/// Drain updates already sitting in the channel without waiting.
pub(crate) fn drain_now(rx: &mut mpsc::Receiver<ChatUpdate>) -> Vec<ChatUpdate> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    updates
}
