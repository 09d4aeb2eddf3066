//! Claude stream parser.
//!
//! Parses line-by-line JSON output from Claude and emits [`ProtocolEvent`]s.
//!
//! # How This Parser Works
//!
//! 1. [`LineBuffer`] collects raw stdout bytes. Data arrives in arbitrary
//!    chunks, so a chunk may end mid-line or even mid-codepoint.
//! 2. Every complete `\n`-terminated line is decoded and handed to
//!    [`parse_line`].
//! 3. [`parse_line`] deserializes the record into a `ClaudeStreamEvent` and
//!    translates it into a `ProtocolEvent`, or `None` if the line is not
//!    something we understand.
//! 4. [`ClaudeParser`] ties the two together and enforces that at most one
//!    `Result` is ever emitted.
//!
//! Splitting happens on the raw `\n` byte, never on decoded text. In UTF-8
//! the byte `0x0A` cannot occur inside a multi-byte sequence, so a complete
//! line always holds complete codepoints, and an incomplete trailing
//! sequence simply waits in the buffer for the next chunk.

use serde_json::Value;

use crate::agents::event::{ContentBlock, ProtocolEvent, Usage};

use super::types::{ClaudeStreamEvent, WireBlock};

/// Accumulates stdout bytes and yields complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    /// Bytes after the last newline seen so far.
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completes.
    ///
    /// Lines are returned without their terminator (`\n` or `\r\n`). Blank
    /// lines are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        // Keep everything after the final newline for the next call.
        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);

        complete
            .split(|&b| b == b'\n')
            .filter_map(decode_line)
            .collect()
    }

    /// Take whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let remaining = std::mem::take(&mut self.pending);
        decode_line(&remaining)
    }

    /// Number of bytes waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw);
    let trimmed = line.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse one complete line of agent output.
///
/// Returns `None` for malformed JSON, unknown record types and records that
/// carry nothing we dispatch (an assistant message with no usable blocks).
pub fn parse_line(line: &str) -> Option<ProtocolEvent> {
    let event: ClaudeStreamEvent = serde_json::from_str(line).ok()?;

    match event.event_type.as_str() {
        "system" => Some(ProtocolEvent::System {
            session_token: event.session_id,
            model: event.model,
            declared_tools: event.tools.iter().filter_map(tool_name).collect(),
        }),

        "assistant" => {
            let blocks: Vec<ContentBlock> = event
                .message
                .map(|message| message.content.into_iter().filter_map(translate_block).collect())
                .unwrap_or_default();

            if blocks.is_empty() {
                None
            } else {
                Some(ProtocolEvent::AssistantChunk { blocks })
            }
        }

        "result" => Some(ProtocolEvent::Result {
            session_token: event.session_id,
            cost_usd: event.total_cost_usd,
            duration_ms: event.duration_ms,
            usage: event.usage.map(|u| Usage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
            summary_text: event.result,
        }),

        other => normalize_delta(other, event.event.as_ref(), event.delta.as_ref()),
    }
}

/// Tool names arrive as bare strings, or as objects with a `name` field.
fn tool_name(value: &Value) -> Option<String> {
    match value {
        Value::String(name) => Some(name.clone()),
        Value::Object(map) => map.get("name").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn translate_block(block: WireBlock) -> Option<ContentBlock> {
    match block.block_type.as_str() {
        "text" => block
            .text
            .filter(|t| !t.is_empty())
            .map(|text| ContentBlock::Text { text }),
        "thinking" => block
            .thinking
            .filter(|t| !t.is_empty())
            .map(|thinking| ContentBlock::Thinking { thinking }),
        "tool_use" => Some(ContentBlock::ToolUse {
            id: block.id.unwrap_or_default(),
            name: block.name.unwrap_or_else(|| "Unknown".to_string()),
            input: block.input.unwrap_or_else(|| serde_json::json!({})),
        }),
        _ => None,
    }
}

/// Re-wrap a streaming delta as a single-block assistant chunk.
///
/// The delta may be nested (`{"type":"stream_event","event":{"type":
/// "content_block_delta","delta":{...}}}`) or carried directly on a record
/// whose own type ends in `delta`. Only `text` and `thinking` deltas are
/// recognized; other delta kinds (tool input JSON, signatures) are dropped.
fn normalize_delta(
    record_type: &str,
    nested: Option<&Value>,
    direct: Option<&Value>,
) -> Option<ProtocolEvent> {
    let delta = nested
        .filter(|event| {
            event
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|t| t.ends_with("delta"))
        })
        .and_then(|event| event.get("delta"))
        .or_else(|| direct.filter(|_| record_type.ends_with("delta")))?;

    let block = if let Some(text) = delta.get("text").and_then(Value::as_str) {
        ContentBlock::Text {
            text: text.to_string(),
        }
    } else if let Some(thinking) = delta.get("thinking").and_then(Value::as_str) {
        ContentBlock::Thinking {
            thinking: thinking.to_string(),
        }
    } else {
        log::debug!(
            "Dropping unsupported delta kind: {}",
            delta.get("type").and_then(Value::as_str).unwrap_or("unknown")
        );
        return None;
    };

    Some(ProtocolEvent::AssistantChunk {
        blocks: vec![block],
    })
}

/// Parser state for one agent invocation.
#[derive(Debug, Default)]
pub struct ClaudeParser {
    lines: LineBuffer,
    result_seen: bool,
}

impl ClaudeParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a `Result` has already been emitted.
    pub fn result_seen(&self) -> bool {
        self.result_seen
    }

    /// Parse one complete line, ignoring everything after the first result.
    pub fn accept_line(&mut self, line: &str) -> Option<ProtocolEvent> {
        if self.result_seen {
            return None;
        }
        let event = parse_line(line);
        if matches!(event, Some(ProtocolEvent::Result { .. })) {
            self.result_seen = true;
        }
        event
    }

    /// Feed raw bytes and collect the events of every completed line.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ProtocolEvent> {
        let lines = self.lines.push(chunk);
        lines
            .iter()
            .filter_map(|line| self.accept_line(line))
            .collect()
    }

    /// Process a final line that arrived without a trailing newline.
    pub fn flush(&mut self) -> Vec<ProtocolEvent> {
        match self.lines.finish() {
            Some(line) => self.accept_line(&line).into_iter().collect(),
            None => Vec::new(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
