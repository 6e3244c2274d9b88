//! Message framing for byte streams.
//!
//! Reads from a pipe or socket can end anywhere, including inside a
//! multi-byte character, so both decoders buffer raw bytes and only decode
//! once a full line is available.

use tracing::warn;

/// Longest line kept while waiting for its terminating `\n`.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Splits a byte stream into newline-delimited lines.
///
/// The trailing fragment after the last `\n` is retained until a later
/// [`feed`](LineBuffer::feed) completes it.
#[derive(Debug, Default)]
pub struct LineBuffer {
    lines: Lines,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer that drops any line longer than `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            lines: Lines::with_limit(limit),
        }
    }

    /// Feed a chunk and return every line it completed.
    ///
    /// A trailing `\r` is stripped and blank lines are skipped.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.lines
            .feed(bytes)
            .into_iter()
            .filter(|line| !line.trim().is_empty())
            .collect()
    }

    /// Bytes received after the last complete line.
    pub fn remainder(&self) -> &[u8] {
        &self.lines.buffer
    }

    /// Whether a partial line is buffered.
    pub fn has_partial(&self) -> bool {
        !self.lines.buffer.is_empty()
    }
}

#[derive(Debug)]
struct Lines {
    buffer: Vec<u8>,
    /// Length of the buffer prefix already known to hold no `\n`.
    scanned: usize,
    /// Set while skipping the rest of an oversized line.
    discarding: bool,
    limit: usize,
}

impl Default for Lines {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl Lines {
    fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            discarding: false,
            limit,
        }
    }

    /// Append a chunk and remove every complete line, leaving the partial tail.
    fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buffer[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            if self.discarding {
                self.discarding = false;
            } else {
                let raw = &self.buffer[start..end];
                let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
                lines.push(String::from_utf8_lossy(raw).into_owned());
            }
            start = end + 1;
            from = start;
        }
        self.buffer.drain(..start);

        if self.discarding {
            self.buffer.clear();
        } else if self.buffer.len() > self.limit {
            warn!(bytes = self.buffer.len(), limit = self.limit, "Dropping oversized line");
            self.buffer.clear();
            self.discarding = true;
        }
        self.scanned = self.buffer.len();
        lines
    }
}

/// A parsed server-sent event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// The `event:` field; `None` means the default `message` type.
    pub event: Option<String>,
    /// The joined `data:` lines.
    pub data: String,
    /// The `id:` field.
    pub id: Option<String>,
}

impl SseEvent {
    /// Event type with the SSE default applied.
    pub fn event_type(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Incremental `text/event-stream` decoder.
#[derive(Debug, Default)]
pub struct SseParser {
    lines: Lines,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        // Blank lines terminate events, so they must not be filtered here.
        for line in self.lines.feed(bytes) {
            if line.is_empty() {
                if let Some(event) = self.finish_event() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line.as_str(), ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                "id" => self.id = Some(value.to_string()),
                _ => {}
            }
        }
        events
    }

    fn finish_event(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event = None;
            self.id = None;
            return None;
        }
        let event = SseEvent {
            event: self.event.take(),
            data: self.data.join("\n"),
            id: self.id.take(),
        };
        self.data.clear();
        Some(event)
    }
}
