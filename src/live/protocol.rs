//! SSE framing used by the live events upstream.
//!
//! Each event is two consecutive lines:
//!
//! ```text
//! event: player_controller_entity_update
//! data: {"steam_id": 123, ...}
//! ```
//!
//! Lines outside that shape are skipped until the next `event:` header. A
//! header that is not immediately followed by a `data:` line is a framing
//! error and ends the stream.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use super::state::PlayerState;

pub const EVENT_PREFIX: &str = "event:";
pub const DATA_PREFIX: &str = "data:";

pub const PLAYER_UPDATE_EVENT: &str = "player_controller_entity_update";
pub const END_EVENT: &str = "end";

/// Longest line accepted before the stream is treated as broken.
pub const MAX_LINE_LEN: usize = 1 << 20;

/// A decoded upstream event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    PlayerUpdate(PlayerState),
    End,
    Unknown { event_type: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("event `{event_type}` not followed by a data line (got {line:?})")]
    MissingData { event_type: String, line: String },
    #[error("stream ended after `{0}` header without a data line")]
    Truncated(String),
    #[error("line exceeds {0} bytes without a newline")]
    LineTooLong(usize),
}

/// Incremental line decoder. Bytes go in through [`feed`](Self::feed),
/// events come out of [`next_event`](Self::next_event).
#[derive(Debug, Default)]
pub struct EventDecoder {
    buf: Vec<u8>,
    /// Start of the first unconsumed line in `buf`.
    start: usize,
    /// Bytes before this offset are known to contain no newline.
    scanned: usize,
    pending_type: Option<String>,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.scanned -= self.start;
            self.start = 0;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Decode the next complete event from buffered lines, if any.
    pub fn next_event(&mut self) -> Result<Option<StreamEvent>, StreamError> {
        while let Some(line) = self.take_line()? {
            match self.pending_type.take() {
                None => {
                    if let Some(event_type) = line.strip_prefix(EVENT_PREFIX) {
                        self.pending_type = Some(event_type.trim().to_string());
                    }
                }
                Some(event_type) => {
                    let Some(data) = line.strip_prefix(DATA_PREFIX) else {
                        return Err(StreamError::MissingData { event_type, line });
                    };
                    if let Some(event) = decode_event(&event_type, data.trim()) {
                        return Ok(Some(event));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Flush at end of input: an unterminated last line is still decoded,
    /// and a dangling header is an error.
    pub fn finish(&mut self) -> Result<Option<StreamEvent>, StreamError> {
        if self.start < self.buf.len() {
            self.buf.push(b'\n');
        }
        if let Some(event) = self.next_event()? {
            return Ok(Some(event));
        }
        match self.pending_type.take() {
            Some(event_type) => Err(StreamError::Truncated(event_type)),
            None => Ok(None),
        }
    }

    fn take_line(&mut self) -> Result<Option<String>, StreamError> {
        let from = self.scanned.max(self.start);
        let Some(offset) = self.buf[from..].iter().position(|&b| b == b'\n') else {
            self.scanned = self.buf.len();
            if self.buf.len() - self.start > MAX_LINE_LEN {
                return Err(StreamError::LineTooLong(MAX_LINE_LEN));
            }
            return Ok(None);
        };

        let end = from + offset;
        let raw = &self.buf[self.start..end];
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = String::from_utf8_lossy(raw).into_owned();
        self.start = end + 1;
        self.scanned = self.start;
        Ok(Some(line))
    }
}

/// Map an event type and its payload to a [`StreamEvent`].
/// Returns `None` when the payload is dropped.
fn decode_event(event_type: &str, data: &str) -> Option<StreamEvent> {
    match event_type {
        PLAYER_UPDATE_EVENT => match serde_json::from_str::<PlayerState>(data) {
            Ok(state) => Some(StreamEvent::PlayerUpdate(state)),
            Err(e) => {
                tracing::warn!("Failed to decode player update, dropping event: {}", e);
                None
            }
        },
        END_EVENT => Some(StreamEvent::End),
        other => Some(StreamEvent::Unknown {
            event_type: other.to_string(),
        }),
    }
}

/// Lazily decodes events from one connection's body.
pub struct EventStream<S> {
    body: S,
    decoder: EventDecoder,
    exhausted: bool,
}

impl<S> EventStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    pub fn new(body: S) -> Self {
        Self {
            body,
            decoder: EventDecoder::new(),
            exhausted: false,
        }
    }

    /// Read the next event. `Ok(None)` means the body ended cleanly.
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>, StreamError> {
        loop {
            if let Some(event) = self.decoder.next_event()? {
                return Ok(Some(event));
            }
            if self.exhausted {
                return self.decoder.finish();
            }
            match self.body.next().await {
                Some(Ok(chunk)) => self.decoder.feed(&chunk),
                Some(Err(e)) => return Err(StreamError::Io(e)),
                None => self.exhausted = true,
            }
        }
    }
}
