//! Claude-specific JSON types for stream parsing.
//!
//! These mirror the shape of the `stream-json` records the CLI writes to
//! stdout, one per line:
//!
//! ```json
//! {"type":"system","subtype":"init","session_id":"sess-1","model":"sonnet","tools":["Bash","Read"]}
//! {"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"Hi"}]}}
//! {"type":"result","session_id":"sess-1","total_cost_usd":0.01,"usage":{"input_tokens":10,"output_tokens":4}}
//! ```
//!
//! Every type-specific field is optional so a single struct can hold any
//! record; the parser decides which fields matter based on `type`.

use serde::Deserialize;

/// A single top-level record from Claude's stdout.
#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeStreamEvent {
    /// `system`, `assistant`, `result`, or some variant we do not model.
    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub subtype: Option<String>,

    #[serde(default)]
    pub session_id: Option<String>,

    /// Model name (system records).
    #[serde(default)]
    pub model: Option<String>,

    /// Tool names available to the agent (system records).
    #[serde(default)]
    pub tools: Vec<serde_json::Value>,

    /// Assistant message with content blocks.
    #[serde(default)]
    pub message: Option<AssistantMessage>,

    /// Final summary text (result records).
    #[serde(default)]
    pub result: Option<String>,

    /// Older CLI releases report `cost_usd`, newer ones `total_cost_usd`.
    #[serde(default, alias = "cost_usd")]
    pub total_cost_usd: Option<f64>,

    #[serde(default)]
    pub duration_ms: Option<u64>,

    #[serde(default)]
    pub usage: Option<WireUsage>,

    /// Nested streaming event (`stream_event` records).
    #[serde(default)]
    pub event: Option<serde_json::Value>,

    /// Streaming delta carried directly on the record.
    #[serde(default)]
    pub delta: Option<serde_json::Value>,
}

/// Assistant message with content blocks.
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<WireBlock>,
}

/// A content block as it appears on the wire.
///
/// Unknown block types (images, redacted thinking) deserialize fine and are
/// dropped by the parser instead of failing the whole record.
#[derive(Debug, Clone, Deserialize)]
pub struct WireBlock {
    #[serde(rename = "type")]
    pub block_type: String,

    #[serde(default)]
    pub text: Option<String>,

    #[serde(default)]
    pub thinking: Option<String>,

    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub input: Option<serde_json::Value>,
}

/// Token usage block on result records.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct WireUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_record_keeps_tool_list() {
        let event: ClaudeStreamEvent = serde_json::from_str(
            r#"{"type":"system","subtype":"init","session_id":"s1","model":"opus","tools":["Bash","Read"]}"#,
        )
        .unwrap();

        assert_eq!(event.event_type, "system");
        assert_eq!(event.session_id.as_deref(), Some("s1"));
        assert_eq!(event.tools.len(), 2);
    }

    #[test]
    fn result_accepts_legacy_cost_field() {
        let event: ClaudeStreamEvent =
            serde_json::from_str(r#"{"type":"result","cost_usd":0.25}"#).unwrap();
        assert_eq!(event.total_cost_usd, Some(0.25));
    }

    #[test]
    fn unknown_block_type_still_parses() {
        let event: ClaudeStreamEvent = serde_json::from_str(
            r#"{"type":"assistant","message":{"content":[{"type":"image","source":{}}]}}"#,
        )
        .unwrap();
        let message = event.message.unwrap();
        assert_eq!(message.content[0].block_type, "image");
    }
}
