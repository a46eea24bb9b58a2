//! Server-Sent Events splitting for stream consumers.
//!
//! The server side is produced by axum's SSE response; this is the reading
//! half, used by clients and tests that follow the stream.

/// Event name of the first event on a stream; its data is the companion
/// request URL.
pub const EVENT_ENDPOINT: &str = "endpoint";

/// Event name carrying one encoded frame.
pub const EVENT_MESSAGE: &str = "message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field; `None` means the default `message` type.
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn name(&self) -> &str {
        self.event.as_deref().unwrap_or(EVENT_MESSAGE)
    }
}

/// Extract complete events from an SSE buffer.
///
/// Events are delimited by a blank line. Multiple `data:` lines are joined
/// with `\n`; comment lines (keep-alives) and blocks without data are
/// skipped. The buffer is drained in place and a trailing partial event
/// stays for the next call.
pub fn drain_events(buffer: &mut String) -> Vec<SseEvent> {
    let mut events = Vec::new();

    loop {
        if buffer.contains("\r\n") {
            *buffer = buffer.replace("\r\n", "\n");
        }
        let Some(pos) = buffer.find("\n\n") else {
            break;
        };
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        let mut event = None;
        let mut data: Vec<&str> = Vec::new();
        for line in block.lines() {
            if line.starts_with(':') {
                continue;
            }
            if let Some(name) = line.strip_prefix("event:") {
                event = Some(name.trim().to_owned());
            } else if let Some(payload) = line.strip_prefix("data:") {
                data.push(payload.strip_prefix(' ').unwrap_or(payload));
            }
        }

        if !data.is_empty() {
            events.push(SseEvent {
                event,
                data: data.join("\n"),
            });
        }
    }

    events
}
