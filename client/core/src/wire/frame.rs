//! Record framing for streamed completion responses.
//!
//! The endpoint answers a streaming request with newline-delimited
//! records. A record carrying an event is a `data: `-prefixed JSON
//! payload; the stream may also carry blank keep-alive lines and a
//! final sentinel:
//!
//! ```text
//! data: {"type":"content","content":"Hel"}\n
//! data: {"type":"content","content":"lo"}\n
//! \n
//! data: [DONE]\n
//! ```
//!
//! Network chunking is arbitrary. A chunk can end mid-record or even
//! mid-way through a multi-byte UTF-8 character, so the decoder buffers
//! raw bytes and splits only on the newline byte. Text decoding happens
//! per extracted record, which makes the emitted records independent of
//! where chunks were cut.
//!
//! # Discard rules
//!
//! Blank lines, whitespace-only lines, and the `[DONE]` sentinel are
//! protocol noise and never surface; the sentinel is logged because its
//! arrival is useful when diagnosing truncated streams.

use tracing::{debug, trace};

/// Sentinel record that marks intentional end of stream.
pub const DONE_SENTINEL: &str = "data: [DONE]";

/// Buffer capacity below which compaction is not worth doing.
const MIN_BUFFER_CAPACITY: usize = 4096;

/// Incremental decoder from raw body chunks to complete records.
///
/// One decoder serves exactly one response body. It is not restartable;
/// after [`finish`](Self::finish) it only ever reports the stream as
/// drained, and a new response needs a new decoder.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    read_pos: usize,
    finished: bool,
}

impl FrameDecoder {
    /// Create a decoder for one response body.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
            finished: false,
        }
    }

    /// Buffer one chunk exactly as it arrived from the transport.
    pub fn feed(&mut self, chunk: &[u8]) {
        if self.finished {
            debug!(
                bytes = chunk.len(),
                "Chunk fed after end of stream, dropped"
            );
            return;
        }
        // Compact consumed bytes before growing the buffer further
        if self.read_pos > self.buffer.len() / 2 && self.buffer.len() > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete record, if the buffer holds one.
    ///
    /// Skips blank lines and the end-of-stream sentinel. Returns `None`
    /// once only a partial record (or nothing) remains buffered.
    pub fn next_record(&mut self) -> Option<String> {
        loop {
            let line = self.take_line()?;
            if let Some(record) = keep_record(line) {
                return Some(record);
            }
        }
    }

    /// Flush the trailing partial record at end of stream.
    ///
    /// A final record is valid without its newline once the transport
    /// reports the body complete. Discard rules still apply.
    pub fn finish(&mut self) -> Option<String> {
        if self.finished {
            return None;
        }
        self.finished = true;
        if self.read_pos >= self.buffer.len() {
            return None;
        }
        let tail = self.buffer.split_off(self.read_pos);
        self.buffer.clear();
        self.read_pos = 0;
        keep_record(decode_line(&tail))
    }

    /// Bytes buffered but not yet consumed.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    fn take_line(&mut self) -> Option<String> {
        let unread = &self.buffer[self.read_pos..];
        let newline = unread.iter().position(|&b| b == b'\n')?;
        let line = decode_line(&unread[..newline]);
        self.read_pos += newline + 1;
        Some(line)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode one extracted line, tolerating CRLF framing.
fn decode_line(bytes: &[u8]) -> String {
    let bytes = match bytes.last() {
        Some(b'\r') => &bytes[..bytes.len() - 1],
        _ => bytes,
    };
    String::from_utf8_lossy(bytes).into_owned()
}

/// Apply the discard rules to one line.
fn keep_record(line: String) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        trace!("Blank record skipped");
        return None;
    }
    if trimmed == DONE_SENTINEL {
        debug!("End-of-stream sentinel received");
        return None;
    }
    Some(line)
}
