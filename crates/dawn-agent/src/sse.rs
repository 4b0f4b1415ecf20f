//! Incremental parser for server-sent-event streams.
//!
//! Network reads arrive in arbitrary chunks, so the parser buffers partial
//! lines across calls to [`SseParser::feed`] and invokes the callback once
//! per complete event.  A line ends at `\n` (a preceding `\r` is stripped),
//! `:` lines are comments, other lines are `field:value` with one optional
//! leading space stripped from the value.  Recognized fields are `event`
//! and `data`; multiple `data` lines are joined with `\n`.  An empty line
//! dispatches the accumulated event.
//!
//! The total buffered size is capped; exceeding the cap is a fatal parser
//! error, not truncation.

use crate::error::{AgentError, Result};

/// Hard cap on buffered bytes (partial line plus accumulated event data).
pub const MAX_BUFFER: usize = 10 * 1024 * 1024;

/// One complete server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event` field, if one was seen.
    pub event: Option<String>,
    /// Joined `data` lines.
    pub data: String,
}

/// Incremental SSE parser.
#[derive(Debug, Default)]
pub struct SseParser {
    /// Unconsumed bytes of a partial line.
    buffer: Vec<u8>,
    /// `event` field of the in-progress event.
    event_type: Option<String>,
    /// Accumulated `data` lines of the in-progress event.
    data_lines: Vec<String>,
    /// Total bytes held in `data_lines`, tracked for the cap.
    data_bytes: usize,
}

impl SseParser {
    /// Create a fresh parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, invoking `on_event` for every event completed
    /// by this chunk.
    pub fn feed(&mut self, bytes: &[u8], mut on_event: impl FnMut(SseEvent)) -> Result<()> {
        self.buffer.extend_from_slice(bytes);

        if self.buffer.len() + self.data_bytes > MAX_BUFFER {
            let buffered = self.buffer.len() + self.data_bytes;
            self.reset();
            return Err(AgentError::StreamOverflow {
                buffered,
                cap: MAX_BUFFER,
            });
        }

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop(); // the `\n`
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(event) = self.take_line(&line) {
                on_event(event);
            }
        }

        Ok(())
    }

    /// Discard all partial state: buffered bytes and the in-progress event.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.event_type = None;
        self.data_lines.clear();
        self.data_bytes = 0;
    }

    /// Process one complete line; returns an event when the line dispatches
    /// one.
    fn take_line(&mut self, line: &str) -> Option<SseEvent> {
        // Empty line: dispatch the accumulated event, if there is one.
        if line.is_empty() {
            if self.event_type.is_none() && self.data_lines.is_empty() {
                return None;
            }
            let event = SseEvent {
                event: self.event_type.take(),
                data: self.data_lines.join("\n"),
            };
            self.data_lines.clear();
            self.data_bytes = 0;
            return Some(event);
        }

        // Comment line.
        if line.starts_with(':') {
            return None;
        }

        // `field:value`, with one optional leading space stripped from the
        // value.  A line with no colon is a field with an empty value.
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event_type = Some(value.to_string()),
            "data" => {
                self.data_bytes += value.len() + 1;
                self.data_lines.push(value.to_string());
            }
            // Unknown fields (`id`, `retry`, vendor extensions) are ignored.
            _ => {}
        }

        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
