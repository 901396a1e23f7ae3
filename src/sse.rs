//! Streaming transform (§4.8): incremental SSE byte-buffer draining plus a
//! per-direction chunk translator built on top of `translate.rs`'s
//! stateful chunk functions. Grounded on the teacher's
//! `forward/client.rs` incremental byte-buffer draining
//! (`drain_sse_lines`/`parse_sse_data`/`is_sse_done`), generalized from a
//! single dialect pair to both directions.

use serde_json::Value;

use crate::dialect::Dialect;
use crate::translate::{
    claude_event_to_openai_chunks, openai_chunk_to_claude_events, ClaudeToOpenaiState,
    OpenaiToClaudeState,
};

/// One already-framed SSE event: an optional `event:` line and its `data:`
/// payload, normalized to a single logical line each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE frame buffer. Provider chunks may split a frame across
/// two socket reads, or pack several frames into one; this never assumes a
/// 1:1 mapping between network writes and logical events.
#[derive(Debug, Default)]
pub struct SseBuffer {
    buf: String,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw upstream bytes (already utf8-lossy-decoded by the
    /// caller) and drain as many complete `\n\n`-terminated frames as are
    /// present, normalizing `\r\n` to `\n` first.
    pub fn push_and_drain(&mut self, chunk: &str) -> Vec<RawSseEvent> {
        let normalized = chunk.replace("\r\n", "\n");
        self.buf.push_str(&normalized);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.find("\n\n") {
            let frame: String = self.buf.drain(..pos + 2).collect();
            let frame = frame.trim_end_matches('\n');
            if let Some(event) = parse_frame(frame) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_frame(frame: &str) -> Option<RawSseEvent> {
    let mut event = None;
    let mut data_lines = Vec::new();
    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start().to_string());
        }
    }
    if data_lines.is_empty() {
        return None;
    }
    Some(RawSseEvent {
        event,
        data: data_lines.join("\n"),
    })
}

pub fn is_done(event: &RawSseEvent) -> bool {
    event.data.trim() == "[DONE]"
}

pub fn format_named_event(event: &str, data: &Value) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

pub fn format_data_event(data: &Value) -> String {
    format!("data: {data}\n\n")
}

pub fn format_done() -> String {
    "data: [DONE]\n\n".to_string()
}

/// Stateful per-connection chunk translator, one direction fixed for the
/// lifetime of a single upstream call (§4.8 "target format may differ from
/// the source dialect").
pub enum StreamTranslator {
    /// Upstream speaks openai, client speaks claude: re-emit named events.
    OpenaiToClaude {
        model: String,
        state: OpenaiToClaudeState,
    },
    /// Upstream speaks claude, client speaks openai: re-emit chunk/DONE.
    ClaudeToOpenai { state: ClaudeToOpenaiState },
    /// Source and target dialect match: pass the frame through unchanged.
    Passthrough,
}

impl StreamTranslator {
    pub fn new(source: Dialect, target: Dialect, model: &str) -> Self {
        match (source, target) {
            (a, b) if a == b => StreamTranslator::Passthrough,
            (Dialect::Claude, Dialect::Openai) => StreamTranslator::OpenaiToClaude {
                model: model.to_string(),
                state: OpenaiToClaudeState::default(),
            },
            (Dialect::Openai, Dialect::Claude) => StreamTranslator::ClaudeToOpenai {
                state: ClaudeToOpenaiState::default(),
            },
        }
    }

    /// Translate one upstream frame into zero or more bytes to write to the
    /// client's SSE response.
    pub fn translate(&mut self, raw: &RawSseEvent) -> String {
        match self {
            StreamTranslator::Passthrough => match &raw.event {
                Some(event) => {
                    let data: Value =
                        serde_json::from_str(&raw.data).unwrap_or(Value::String(raw.data.clone()));
                    format_named_event(event, &data)
                }
                None => {
                    if is_done(raw) {
                        format_done()
                    } else {
                        let data: Value = serde_json::from_str(&raw.data)
                            .unwrap_or(Value::String(raw.data.clone()));
                        format_data_event(&data)
                    }
                }
            },
            StreamTranslator::OpenaiToClaude { model, state } => {
                if is_done(raw) {
                    state.stopped = true;
                    return format_named_event("message_stop", &serde_json::json!({}));
                }
                let Ok(chunk) = serde_json::from_str::<Value>(&raw.data) else {
                    return String::new();
                };
                let mut out = String::new();
                for (event, data) in openai_chunk_to_claude_events(&chunk, model, state) {
                    out.push_str(&format_named_event(event, &data));
                }
                out
            }
            StreamTranslator::ClaudeToOpenai { state } => {
                let Some(event_type) = &raw.event else {
                    return String::new();
                };
                let Ok(payload) = serde_json::from_str::<Value>(&raw.data) else {
                    return String::new();
                };
                let mut out = String::new();
                for chunk in claude_event_to_openai_chunks(event_type, &payload, state) {
                    if chunk == Value::String("[DONE]".to_string()) {
                        out.push_str(&format_done());
                    } else {
                        out.push_str(&format_data_event(&chunk));
                    }
                }
                out
            }
        }
    }

    /// Called once the upstream byte stream has ended. If the upstream
    /// closed without sending its own terminator frame, emit the missing
    /// one so the client still sees a well-formed end of stream (§4.8).
    pub fn flush(&mut self) -> String {
        match self {
            StreamTranslator::Passthrough => String::new(),
            StreamTranslator::OpenaiToClaude { state, .. } => {
                if state.stopped {
                    String::new()
                } else {
                    state.stopped = true;
                    format_named_event("message_stop", &serde_json::json!({}))
                }
            }
            StreamTranslator::ClaudeToOpenai { state } => {
                if state.done {
                    String::new()
                } else {
                    state.done = true;
                    format_done()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_complete_frames_and_holds_partial_tail() {
        let mut buf = SseBuffer::new();
        let events = buf.push_and_drain("data: {\"a\":1}\n\ndata: {\"a\":2");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"a\":1}");
        let events2 = buf.push_and_drain("}\n\n");
        assert_eq!(events2.len(), 1);
        assert_eq!(events2[0].data, "{\"a\":2}");
    }

    #[test]
    fn normalizes_crlf_before_splitting() {
        let mut buf = SseBuffer::new();
        let events = buf.push_and_drain("event: message_stop\r\ndata: {}\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message_stop"));
    }

    #[test]
    fn recognizes_done_sentinel() {
        let mut buf = SseBuffer::new();
        let events = buf.push_and_drain("data: [DONE]\n\n");
        assert!(is_done(&events[0]));
    }

    #[test]
    fn passthrough_reemits_named_events_verbatim() {
        let mut t = StreamTranslator::new(Dialect::Claude, Dialect::Claude, "m");
        let raw = RawSseEvent {
            event: Some("content_block_delta".to_string()),
            data: "{\"type\":\"content_block_delta\"}".to_string(),
        };
        let out = t.translate(&raw);
        assert!(out.starts_with("event: content_block_delta\n"));
    }

    #[test]
    fn openai_to_claude_translates_done_into_message_stop() {
        let mut t = StreamTranslator::new(Dialect::Claude, Dialect::Openai, "m");
        let raw = RawSseEvent { event: None, data: "[DONE]".to_string() };
        let out = t.translate(&raw);
        assert!(out.contains("message_stop"));
        assert!(out.contains("data: {}"));
    }

    #[test]
    fn flush_emits_message_stop_when_upstream_never_sent_done() {
        let mut t = StreamTranslator::new(Dialect::Claude, Dialect::Openai, "m");
        let out = t.flush();
        assert!(out.contains("message_stop"));
        assert!(t.flush().is_empty(), "flush must be idempotent");
    }

    #[test]
    fn flush_is_noop_after_explicit_done() {
        let mut t = StreamTranslator::new(Dialect::Claude, Dialect::Openai, "m");
        let raw = RawSseEvent { event: None, data: "[DONE]".to_string() };
        t.translate(&raw);
        assert!(t.flush().is_empty());
    }

    #[test]
    fn flush_emits_done_when_claude_upstream_never_sent_message_stop() {
        let mut t = StreamTranslator::new(Dialect::Openai, Dialect::Claude, "m");
        let out = t.flush();
        assert_eq!(out, "data: [DONE]\n\n");
    }
}
