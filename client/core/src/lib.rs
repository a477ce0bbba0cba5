//! Chatkit Core - Streaming Chat Client for Completion APIs
//!
//! This crate implements the full client side of a streaming chat
//! completion endpoint, completely independent of any UI framework. It
//! can drive a terminal REPL, a desktop surface, or run headless for
//! testing/automation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Caller / UI                          │
//! │        send_message()                ChatUpdate (mpsc)       │
//! └────────────┬─────────────────────────────────▲───────────────┘
//!              │                                 │
//! ┌────────────▼─────────────────────────────────┴───────────────┐
//! │                        Conversation                          │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │ FallbackOrchestrator (one exchange, rate-limit rescue) │  │
//! │  │  ┌──────────────────────────────────────────────────┐  │  │
//! │  │  │ RequestLifecycle (dispatch, deadline, cancel)    │  │  │
//! │  │  │                                                  │  │  │
//! │  │  │  CompletionTransport ──▶ FrameDecoder            │  │  │
//! │  │  │        (HTTP)            interpret_record        │  │  │
//! │  │  │                            │        │            │  │  │
//! │  │  │                   SessionTracker  MessageAccum.  │  │  │
//! │  │  └──────────────────────────────────────────────────┘  │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Conversation`]: The facade a surface holds; owns history and session
//! - [`ChatHandle`]: Cancellable handle for one in-flight exchange
//! - [`ChatUpdate`]: Updates streamed to the consumer over a channel
//! - [`FrameDecoder`]: Splits arbitrary byte chunks into wire records
//! - [`StreamEvent`]: One interpreted server event
//! - [`CompletionTransport`]: The HTTP seam, swappable for tests
//!
//! # Quick Start
//!
//! ```ignore
//! use chatkit_core::{ChatUpdate, ClientConfig, Conversation, HttpTransport};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::load();
//!     let (tx, mut rx) = mpsc::channel(config.channel_capacity);
//!
//!     let transport = HttpTransport::new(config.endpoint.clone())?;
//!     let conversation = Conversation::new(transport, config, tx);
//!
//!     let handle = conversation.send_message("hello")?;
//!     while let Some(update) = rx.recv().await {
//!         match update {
//!             ChatUpdate::Delta { content, .. } => println!("{content}"),
//!             ChatUpdate::SessionAssigned { session_id } => {
//!                 eprintln!("session: {session_id}");
//!             }
//!             ChatUpdate::Terminal { outcome } => {
//!                 eprintln!("{outcome:?}");
//!                 break;
//!             }
//!         }
//!     }
//!     handle.join().await;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`wire`]: Frame decoding and event interpretation for the stream format
//! - [`transport`]: HTTP transport seam and the reqwest implementation
//! - [`lifecycle`]: One request attempt from dispatch to terminal outcome
//! - [`fallback`]: Rate-limit fallback onto a secondary provider
//! - [`accumulator`]: Streamed text assembly with snapshot notifications
//! - [`session`]: Conversation history, session identity, persistence
//! - [`conversation`]: The facade tying everything together
//! - [`config`]: File, environment, and builder configuration
//! - [`update`]: The consumer-facing update stream
//! - [`error`]: Request failure classification
//!
//! # No UI Dependencies
//!
//! This crate has **zero** dependencies on any terminal or UI framework.
//! It's pure client logic that can be used anywhere.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod accumulator;
pub mod config;
pub mod conversation;
pub mod error;
pub mod fallback;
pub mod lifecycle;
pub mod session;
pub mod transport;
pub mod update;
pub mod wire;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenience
pub use accumulator::MessageAccumulator;
pub use config::{
    default_config_path, ClientConfig, ConfigError, ProviderTarget, MAX_TEMPERATURE,
};
pub use conversation::Conversation;
pub use error::{error_message_from_body, ChatError};
pub use fallback::{fallback_notice, ConversationBusy, FallbackOrchestrator};
pub use lifecycle::{ChatHandle, RequestAttempt, RequestLifecycle};
pub use update::{ChatUpdate, TerminalOutcome};

// Session exports
pub use session::{
    ConversationSession, Message, MessageId, MessageRole, MessageState, SessionStore,
    SessionStoreError, SessionTracker, SESSION_FILE_NAME,
};

// Transport exports
pub use transport::{
    ByteStream, CompletionRequest, CompletionTransport, HttpTransport, TransportError,
    TransportReply,
};

// Wire format exports
pub use wire::{interpret_record, FrameDecoder, StreamEvent, DONE_SENTINEL, RECORD_PREFIX};
