//! Persistence data types.
//!
//! # Data Model Overview
//!
//! Each session is one JSON document:
//!
//! ```text
//! {data_dir}/sessions/{session_id}.json
//! ├── session     # workspace, title, resume token, timestamps
//! ├── messages    # user, assistant and tool messages, ordered
//! └── artifacts   # one row per (session, file path)
//! ```

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agents::event::ToolCall;
use crate::agents::tools::ToolOperation;

// ============================================================================
// Message Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A single message in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,

    pub session_id: String,

    pub role: Role,

    /// Message text. For an assistant message, the accumulated reply.
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,

    /// Tool calls made during the turn, as a JSON array.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<String>,

    /// Position within the session. Unique per session.
    pub order: u32,

    /// True until the message is finalized.
    #[serde(default)]
    pub is_streaming: bool,

    /// Total tokens (input + output) reported for the turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn new(session_id: &str, role: Role, content: &str, order: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            thinking: None,
            tool_calls: None,
            order,
            is_streaming: role == Role::Assistant && content.is_empty(),
            tokens: None,
            cost_usd: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Decoded tool calls, or empty if none or unreadable.
    pub fn decoded_tool_calls(&self) -> Vec<ToolCall> {
        self.tool_calls
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default()
    }

    pub(crate) fn apply(&mut self, content: &MessageContent) {
        self.content = content.text.clone();
        self.thinking = (!content.thinking.is_empty()).then(|| content.thinking.clone());
        self.tool_calls = content.tool_calls_json();
        self.updated_at = Utc::now();
    }

    /// Streaming update. Ignored once the message is finalized.
    pub(crate) fn apply_streaming(&mut self, content: &MessageContent) {
        if !self.is_streaming {
            log::debug!("Ignoring streaming update for finalized message {}", self.id);
            return;
        }
        self.apply(content);
    }

    pub(crate) fn finalize(&mut self, content: &MessageContent, accounting: TurnAccounting) {
        self.apply(content);
        self.tokens = accounting.tokens;
        self.cost_usd = accounting.cost_usd;
        self.is_streaming = false;
    }
}

/// The streaming body of an assistant message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageContent {
    pub text: String,
    pub thinking: String,
    pub tool_calls: Vec<ToolCall>,
}

impl MessageContent {
    /// Nothing worth keeping: no text and no tool calls.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.tool_calls.is_empty()
    }

    pub fn tool_calls_json(&self) -> Option<String> {
        if self.tool_calls.is_empty() {
            return None;
        }
        match serde_json::to_string(&self.tool_calls) {
            Ok(json) => Some(json),
            Err(err) => {
                log::warn!("Failed to serialize tool calls: {}", err);
                None
            }
        }
    }
}

/// Turn accounting written when a message is finalized.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TurnAccounting {
    pub tokens: Option<u64>,
    pub cost_usd: Option<f64>,
}

// ============================================================================
// Session Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,

    /// Working directory for the agent.
    pub workspace_path: PathBuf,

    #[serde(default)]
    pub title: Option<String>,

    /// Agent conversation token for `--resume`.
    #[serde(default)]
    pub resume_token: Option<String>,

    pub created_at: DateTime<Utc>,

    pub last_activity_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(id: impl Into<String>, workspace_path: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            workspace_path: workspace_path.into(),
            title: None,
            resume_token: None,
            created_at: now,
            last_activity_at: now,
        }
    }
}

/// A file the agent created or edited in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub id: String,
    pub session_id: String,
    pub path: String,
    pub operation: ToolOperation,
    pub created_at: DateTime<Utc>,
}

impl ArtifactRecord {
    pub fn new(session_id: &str, path: &str, operation: ToolOperation) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            path: path.to_string(),
            operation,
            created_at: Utc::now(),
        }
    }
}

/// Everything stored for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDocument {
    pub session: SessionRecord,

    #[serde(default)]
    pub messages: Vec<MessageRecord>,

    #[serde(default)]
    pub artifacts: Vec<ArtifactRecord>,
}

impl SessionDocument {
    pub fn new(session: SessionRecord) -> Self {
        Self {
            session,
            messages: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn next_order(&self) -> u32 {
        self.messages
            .iter()
            .map(|m| m.order + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn message_mut(&mut self, message_id: &str) -> Option<&mut MessageRecord> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }

    pub fn contains_message(&self, message_id: &str) -> bool {
        self.messages.iter().any(|m| m.id == message_id)
    }

    /// Messages sorted by order.
    pub fn ordered_messages(&self) -> Vec<MessageRecord> {
        let mut messages = self.messages.clone();
        messages.sort_by_key(|m| m.order);
        messages
    }

    pub fn has_artifact(&self, path: &str) -> bool {
        self.artifacts.iter().any(|a| a.path == path)
    }
}
