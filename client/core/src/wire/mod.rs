//! Wire protocol for the streaming completion endpoint.
//!
//! Two layers, deliberately separate: [`frame`] turns an arbitrarily
//! chunked byte stream into complete newline-delimited records, and
//! [`event`] turns one record into a typed [`StreamEvent`]. The frame
//! layer is the only place in the workspace that splits on newlines;
//! everything downstream consumes whole records.

pub mod event;
pub mod frame;

pub use event::{interpret_record, StreamEvent, RECORD_PREFIX};
pub use frame::{FrameDecoder, DONE_SENTINEL};
