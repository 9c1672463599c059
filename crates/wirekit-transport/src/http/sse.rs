//! Server-Sent Events parsing and client-side delivery ordering.

use bytes::{Buf, BytesMut};

use crate::error::TransportError;

/// One parsed SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// The `id:` field, if present.
    pub id: Option<String>,
    /// The `event:` field, if present.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
}

impl SseEvent {
    /// The event id as a stream sequence number.
    #[must_use]
    pub fn seq(&self) -> Option<u64> {
        self.id.as_deref().and_then(|id| id.trim().parse().ok())
    }
}

/// Incremental SSE parser.
///
/// Feed it chunks as they arrive; it returns every event completed by the
/// chunk. Lines may end in `\n` or `\r\n`, and a blank line ends an event.
#[derive(Debug)]
pub struct SseParser {
    buffer: BytesMut,
    current: SseEvent,
    has_fields: bool,
    max_event_size: usize,
}

impl SseParser {
    /// Create a parser rejecting events larger than `max_event_size` bytes.
    #[must_use]
    pub fn new(max_event_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            current: SseEvent::default(),
            has_fields: false,
            max_event_size,
        }
    }

    /// Feed a chunk and collect the events it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, TransportError> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line = self.buffer.split_to(newline + 1);
            line.truncate(newline);
            if line.last() == Some(&b'\r') {
                line.truncate(newline - 1);
            }

            let line = std::str::from_utf8(&line)
                .map_err(|e| TransportError::protocol(format!("invalid UTF-8 in SSE stream: {e}")))?;

            if line.is_empty() {
                if self.has_fields {
                    events.push(std::mem::take(&mut self.current));
                    self.has_fields = false;
                }
                continue;
            }
            self.field(line);
        }

        let pending = self.buffer.len() + self.current.data.len();
        if pending > self.max_event_size {
            let size = pending;
            self.buffer.advance(self.buffer.len());
            self.current = SseEvent::default();
            self.has_fields = false;
            return Err(TransportError::MessageTooLarge {
                size,
                max: self.max_event_size,
            });
        }

        Ok(events)
    }

    fn field(&mut self, line: &str) {
        // Comment lines (keep-alives) start with a colon.
        if line.starts_with(':') {
            return;
        }
        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match name {
            "id" => {
                self.current.id = Some(value.to_string());
                self.has_fields = true;
            }
            "event" => {
                self.current.event = Some(value.to_string());
                self.has_fields = true;
            }
            "data" => {
                if !self.current.data.is_empty() {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(value);
                self.has_fields = true;
            }
            _ => {}
        }
    }
}

/// What to do with an event carrying a sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Next in line: deliver it.
    Deliver,
    /// Already delivered: drop it.
    Duplicate,
    /// One or more events are missing before it.
    Gap,
}

/// Contiguous delivery watermark.
///
/// The floor is the highest sequence number such that every event up to and
/// including it has been delivered. The client sends the floor as
/// `Last-Event-ID` on every request, so each server stream starts at most
/// one past the floor and the merge of all streams stays in order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watermark {
    floor: u64,
}

impl Watermark {
    /// Start at a known floor.
    #[must_use]
    pub const fn new(floor: u64) -> Self {
        Self { floor }
    }

    /// The current floor.
    #[must_use]
    pub const fn floor(&self) -> u64 {
        self.floor
    }

    /// Decide on `seq` and advance the floor when it is delivered.
    pub fn admit(&mut self, seq: u64) -> Admission {
        if seq <= self.floor {
            Admission::Duplicate
        } else if seq == self.floor + 1 {
            self.floor = seq;
            Admission::Deliver
        } else {
            Admission::Gap
        }
    }
}
