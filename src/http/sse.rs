//! Server-Sent Events parser for `text/event-stream` replies.

/// A parsed SSE event. Only the payload matters here; `event:` types and
/// comments are skipped.
#[derive(Debug, Clone)]
pub struct SseEvent {
    /// Event data (from `data:` lines, joined with newlines).
    pub data: String,
}

/// Incremental SSE parser.
///
/// Buffers partial data and emits complete events.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of data and return any complete events.
    ///
    /// Events are delimited by a blank line. CRLF line endings are normalized.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(&chunk.replace("\r\n", "\n"));
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find("\n\n") {
            let event_text = self.buffer[..pos].to_string();
            self.buffer = self.buffer[pos + 2..].to_string();

            if let Some(event) = Self::parse_event(&event_text) {
                events.push(event);
            }
        }

        events
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        Self::parse_event(rest.trim_end_matches('\n'))
    }

    fn parse_event(text: &str) -> Option<SseEvent> {
        let data_parts: Vec<_> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(str::trim_start)
            .collect();

        if data_parts.is_empty() {
            return None;
        }

        Some(SseEvent {
            data: data_parts.join("\n"),
        })
    }
}
