//! Chatkit - Terminal Chat for Streaming Completion Endpoints
//!
//! Interactive REPL surface over `chatkit-core`. Reads messages from
//! stdin, streams the assistant response to stdout as it arrives, and
//! keeps the server-side session across restarts.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (config file + CHATKIT_* environment)
//! chatkit
//!
//! # Pick a provider and model
//! chatkit --service mistral --model mistral-small
//!
//! # Arm a fallback provider for rate limits
//! chatkit --fallback-service ollama --fallback-model llama3.2
//!
//! # With config file
//! chatkit --config ~/.config/chatkit/config.toml
//!
//! # Verbose logging
//! RUST_LOG=debug chatkit
//! ```
//!
//! # Controls
//!
//! - `Ctrl-C` while a response is streaming: stop that response,
//!   keeping the partial text; a second `Ctrl-C` leaves the REPL
//! - `Ctrl-C` at the prompt: ignored (a hint is printed)
//! - `/quit` or `/exit`: leave the REPL

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chatkit_core::{
    ChatHandle, ChatUpdate, ClientConfig, Conversation, HttpTransport, MessageId, TerminalOutcome,
};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

/// Chatkit - terminal chat surface for streaming completion endpoints
#[derive(Parser, Debug)]
#[command(name = "chatkit")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Completions endpoint URL
    #[arg(short = 'e', long, env = "CHATKIT_ENDPOINT", value_name = "URL")]
    endpoint: Option<String>,

    /// Primary provider service
    #[arg(short = 's', long, env = "CHATKIT_SERVICE", value_name = "NAME")]
    service: Option<String>,

    /// Primary model
    #[arg(short = 'm', long, env = "CHATKIT_MODEL", value_name = "NAME")]
    model: Option<String>,

    /// Standby service engaged only after a rate limit
    #[arg(long, env = "CHATKIT_FALLBACK_SERVICE", value_name = "NAME")]
    fallback_service: Option<String>,

    /// Standby model, required together with --fallback-service
    #[arg(long, env = "CHATKIT_FALLBACK_MODEL", value_name = "NAME")]
    fallback_model: Option<String>,

    /// Sampling temperature (clamped to 0.0..=2.0)
    #[arg(short = 't', long, env = "CHATKIT_TEMPERATURE", value_name = "FLOAT")]
    temperature: Option<f32>,

    /// Per-request deadline in seconds, covering headers and body
    #[arg(long, env = "CHATKIT_TIMEOUT_SECS", value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Wait for one buffered response instead of the record stream
    #[arg(long)]
    no_stream: bool,

    /// Configuration file path
    #[arg(short = 'c', long, env = "CHATKIT_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Session id storage path
    #[arg(long, env = "CHATKIT_SESSION_FILE", value_name = "PATH")]
    session_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "CHATKIT_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

/// Initialize logging with the specified level
///
/// Logs go to stderr so they never interleave with streamed response
/// text on stdout.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("chatkit={level},chatkit_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Layer CLI flags over the loaded configuration
fn build_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::load_from_path(path)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?,
        None => ClientConfig::load(),
    };

    if let Some(endpoint) = &args.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(service) = &args.service {
        config.primary.service = service.clone();
    }
    if let Some(model) = &args.model {
        config.primary.model = model.clone();
    }
    config.set_secondary(args.fallback_service.clone(), args.fallback_model.clone());
    if let Some(temperature) = args.temperature {
        config = config.with_temperature(temperature);
    }
    if let Some(secs) = args.timeout_secs {
        config.request_timeout = std::time::Duration::from_secs(secs);
    }
    if args.no_stream {
        config.streaming = false;
    }
    if let Some(path) = &args.session_file {
        config.session_file = Some(path.clone());
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = build_config(&args)?;
    debug!(
        endpoint = %config.endpoint,
        provider = %config.primary.label(),
        "Chatkit starting"
    );

    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let transport = HttpTransport::new(config.endpoint.clone())
        .context("Failed to construct the HTTP transport")?;
    let conversation = Conversation::new(transport, config, tx);

    if let Some(session_id) = conversation.session_id() {
        eprintln!("(resuming session {session_id})");
    }

    run_repl(&conversation, rx).await
}

/// Prompt loop: read a line, send it, stream the reply
async fn run_repl(
    conversation: &Conversation<HttpTransport>,
    mut rx: mpsc::Receiver<ChatUpdate>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("you> ");
        std::io::stdout().flush().context("Failed to flush stdout")?;

        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n(^C ignored at the prompt, use /quit to exit)");
                continue;
            }
        };
        let Some(line) = line else {
            // stdin closed
            return Ok(());
        };

        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "/quit" || text == "/exit" {
            return Ok(());
        }

        match conversation.send_message(text) {
            Ok(handle) => {
                if let StreamEnd::Quit = stream_response(&handle, &mut rx).await? {
                    return Ok(());
                }
            }
            Err(busy) => eprintln!("({busy})"),
        }
    }
}

/// What ended one streamed exchange
enum StreamEnd {
    /// Terminal outcome rendered, back to the prompt
    Finished,
    /// Second Ctrl-C during the same exchange, leave the REPL
    Quit,
}

/// Render updates for one exchange until its terminal outcome arrives
async fn stream_response(
    handle: &ChatHandle,
    rx: &mut mpsc::Receiver<ChatUpdate>,
) -> Result<StreamEnd> {
    let mut printer = DeltaPrinter::default();
    let mut cancel_requested = false;

    loop {
        let first = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if cancel_requested {
                    println!();
                    return Ok(StreamEnd::Quit);
                }
                cancel_requested = true;
                handle.cancel();
                continue;
            }
            update = rx.recv() => match update {
                Some(update) => update,
                // The conversation owns the sender, so this only happens
                // on teardown
                None => return Ok(StreamEnd::Finished),
            },
        };

        for update in coalesce_pending(first, rx) {
            match update {
                ChatUpdate::Delta {
                    message_id,
                    content,
                } => printer.print_snapshot(&message_id, &content)?,
                ChatUpdate::SessionAssigned { session_id } => {
                    debug!(session_id = %session_id, "Session assigned");
                }
                ChatUpdate::Terminal { outcome } => {
                    finish_exchange(&mut printer, &outcome)?;
                    return Ok(StreamEnd::Finished);
                }
            }
        }
    }
}

fn finish_exchange(printer: &mut DeltaPrinter, outcome: &TerminalOutcome) -> Result<()> {
    // A coalesced burst may have ended before the last snapshot; the
    // terminal message carries the authoritative final content
    if let Some(message) = outcome.message() {
        printer.print_snapshot(&message.id, &message.content)?;
    }

    match outcome {
        TerminalOutcome::Delivered { message } => {
            println!();
            if let Some(label) = &message.provider_label {
                debug!(provider = %label, "Response delivered");
            }
        }
        TerminalOutcome::Cancelled { .. } => println!("\n[stopped]"),
        TerminalOutcome::Failed { error, .. } => {
            println!();
            eprintln!("[failed: {error}]");
        }
    }
    Ok(())
}

/// Drain whatever already sits in the channel and collapse consecutive
/// snapshot runs, so a burst renders as one write.
///
/// Every delta carries the full accumulated content, which is what
/// makes dropping intermediates safe. Session assignments and terminal
/// outcomes are never dropped.
fn coalesce_pending(first: ChatUpdate, rx: &mut mpsc::Receiver<ChatUpdate>) -> Vec<ChatUpdate> {
    let mut batch = vec![first];
    while let Ok(update) = rx.try_recv() {
        batch.push(update);
    }
    collapse_delta_runs(batch)
}

fn collapse_delta_runs(batch: Vec<ChatUpdate>) -> Vec<ChatUpdate> {
    let mut out: Vec<ChatUpdate> = Vec::with_capacity(batch.len());
    for update in batch {
        let replaces_last = match (&update, out.last()) {
            (
                ChatUpdate::Delta { message_id, .. },
                Some(ChatUpdate::Delta {
                    message_id: last_id,
                    ..
                }),
            ) => message_id == last_id,
            _ => false,
        };
        if replaces_last {
            let last = out.len() - 1;
            out[last] = update;
        } else {
            out.push(update);
        }
    }
    out
}

/// Incremental printer over full-content snapshots.
///
/// Tracks how many bytes of the current message are already on screen
/// and prints only the new suffix of each snapshot.
#[derive(Default)]
struct DeltaPrinter {
    current: Option<MessageId>,
    printed: usize,
}

impl DeltaPrinter {
    fn print_snapshot(&mut self, message_id: &MessageId, content: &str) -> Result<()> {
        if self.current.as_ref() != Some(message_id) {
            self.current = Some(message_id.clone());
            self.printed = 0;
        }

        if let Some(suffix) = content.get(self.printed..) {
            if !suffix.is_empty() {
                print!("{suffix}");
                std::io::stdout().flush().context("Failed to flush stdout")?;
            }
            self.printed = content.len();
        } else {
            // Snapshots only grow, so a shorter one means a different
            // stream generation; start over from what it carries
            self.printed = content.len();
        }
        Ok(())
    }
}
