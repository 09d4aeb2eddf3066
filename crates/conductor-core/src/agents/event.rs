//! Event types flowing through a turn.
//!
//! Two layers:
//! - [`ProtocolEvent`] is what the parser produces from the agent's stdout.
//! - [`TurnEvent`] is what the orchestrator publishes to the event sink.

use serde::{Deserialize, Serialize};

use super::tools::{ToolClassification, ToolOperation};

/// A single block inside an assistant chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
}

/// Token usage reported with a result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Typed protocol event produced by the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// Emitted once near process start.
    System {
        session_token: Option<String>,
        model: Option<String>,
        declared_tools: Vec<String>,
    },

    /// One or more content blocks from the assistant.
    AssistantChunk { blocks: Vec<ContentBlock> },

    /// Terminal success event. At most one per invocation.
    Result {
        session_token: Option<String>,
        cost_usd: Option<f64>,
        duration_ms: Option<u64>,
        usage: Option<Usage>,
        summary_text: Option<String>,
    },
}

/// A tool call recorded during a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Why a turn finished without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DoneReason {
    /// The agent delivered a result.
    Completed,
    /// The agent exited without a result.
    Exited,
    /// The host cancelled the turn.
    Cancelled,
}

/// Event published to the event sink for the UI to render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TurnEvent {
    TextDelta {
        text: String,
    },

    ThinkingDelta {
        text: String,
    },

    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
        operation: ToolOperation,
        #[serde(skip_serializing_if = "Option::is_none")]
        display_target: Option<String>,
    },

    /// The agent is suspended until the host resumes or cancels it.
    PermissionRequired {
        tool_use_id: String,
        name: String,
        operation: ToolOperation,
        #[serde(skip_serializing_if = "Option::is_none")]
        display_target: Option<String>,
    },

    ArtifactCreated {
        path: String,
        operation: ToolOperation,
    },

    TitleUpdated {
        title: String,
    },

    Done {
        reason: DoneReason,
    },

    Error {
        message: String,
    },
}

impl TurnEvent {
    pub fn tool_call(call: &ToolCall, classification: &ToolClassification) -> Self {
        TurnEvent::ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
            operation: classification.operation,
            display_target: classification.display_target.clone(),
        }
    }

    pub fn permission_required(call: &ToolCall, classification: &ToolClassification) -> Self {
        TurnEvent::PermissionRequired {
            tool_use_id: call.id.clone(),
            name: call.name.clone(),
            operation: classification.operation,
            display_target: classification.display_target.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod content_block {
        use super::*;

        #[test]
        fn tool_use_deserializes_with_input() {
            let block: ContentBlock = serde_json::from_value(json!({
                "type": "tool_use",
                "id": "toolu_1",
                "name": "Read",
                "input": {"file_path": "/tmp/a.rs"}
            }))
            .unwrap();

            match block {
                ContentBlock::ToolUse { id, name, input } => {
                    assert_eq!(id, "toolu_1");
                    assert_eq!(name, "Read");
                    assert_eq!(input["file_path"], "/tmp/a.rs");
                }
                other => panic!("Expected ToolUse, got {other:?}"),
            }
        }

        #[test]
        fn tool_use_without_input_defaults_to_null() {
            let block: ContentBlock = serde_json::from_value(json!({
                "type": "tool_use",
                "id": "toolu_2",
                "name": "LS"
            }))
            .unwrap();

            assert!(matches!(
                block,
                ContentBlock::ToolUse { input: serde_json::Value::Null, .. }
            ));
        }
    }

    mod turn_event {
        use super::*;

        #[test]
        fn uses_camel_case_kind_tag() {
            let json = serde_json::to_value(TurnEvent::TextDelta {
                text: "hi".to_string(),
            })
            .unwrap();
            assert_eq!(json["kind"], "textDelta");
        }

        #[test]
        fn done_carries_reason() {
            let json = serde_json::to_value(TurnEvent::Done {
                reason: DoneReason::Exited,
            })
            .unwrap();
            assert_eq!(json["kind"], "done");
            assert_eq!(json["reason"], "exited");
        }

        #[test]
        fn tool_call_skips_missing_target() {
            let call = ToolCall {
                id: "t1".to_string(),
                name: "TodoWrite".to_string(),
                input: json!({}),
            };
            let classification = ToolClassification {
                operation: ToolOperation::Other,
                display_target: None,
                requires_suspend: false,
            };
            let json = serde_json::to_string(&TurnEvent::tool_call(&call, &classification)).unwrap();
            assert!(!json.contains("display_target"));
            assert!(json.contains("\"operation\":\"other\""));
        }
    }

    #[test]
    fn usage_total_sums_tokens() {
        let usage = Usage {
            input_tokens: 120,
            output_tokens: 30,
        };
        assert_eq!(usage.total(), 150);
    }
}
