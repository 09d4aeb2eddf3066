//! Tool call classification.
//!
//! Maps a tool name and its JSON input to an operation kind, a short
//! display target (file path, pattern, command) and whether the agent must
//! be suspended until the host decides.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::PermissionMode;

/// What kind of work a tool call performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolOperation {
    Read,
    Search,
    Bash,
    Create,
    Edit,
    Question,
    Other,
}

impl ToolOperation {
    /// Operations that modify a file on disk.
    pub fn is_file_write(self) -> bool {
        matches!(self, ToolOperation::Create | ToolOperation::Edit)
    }
}

/// Result of classifying one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolClassification {
    pub operation: ToolOperation,
    pub display_target: Option<String>,
    pub requires_suspend: bool,
}

fn operation_for(name: &str) -> ToolOperation {
    match name {
        "Read" | "NotebookRead" => ToolOperation::Read,
        "Grep" | "Glob" | "LS" | "WebSearch" | "WebFetch" => ToolOperation::Search,
        "Bash" | "BashOutput" => ToolOperation::Bash,
        "Write" => ToolOperation::Create,
        "Edit" | "MultiEdit" | "NotebookEdit" => ToolOperation::Edit,
        "AskUserQuestion" => ToolOperation::Question,
        _ => ToolOperation::Other,
    }
}

fn str_field<'a>(input: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| input.get(*key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

fn display_target_for(operation: ToolOperation, input: &Value) -> Option<String> {
    let target = match operation {
        ToolOperation::Read | ToolOperation::Create | ToolOperation::Edit => {
            str_field(input, &["file_path", "notebook_path", "path"])
        }
        ToolOperation::Search => str_field(input, &["pattern", "query", "url", "path"]),
        ToolOperation::Bash => str_field(input, &["command"]),
        ToolOperation::Question => input
            .get("questions")
            .and_then(Value::as_array)
            .and_then(|questions| questions.first())
            .and_then(|q| q.get("question"))
            .and_then(Value::as_str)
            .or_else(|| str_field(input, &["question"])),
        ToolOperation::Other => None,
    };
    target.map(str::to_string)
}

/// Classify a tool call under the active permission mode.
pub fn classify(name: &str, input: &Value, mode: PermissionMode) -> ToolClassification {
    let operation = operation_for(name);
    let requires_suspend = match operation {
        ToolOperation::Question => true,
        ToolOperation::Create | ToolOperation::Edit => mode.requires_edit_approval(),
        _ => false,
    };

    ToolClassification {
        operation,
        display_target: display_target_for(operation, input),
        requires_suspend,
    }
}

/// File path touched by a create/edit call, if any.
pub fn artifact_path(classification: &ToolClassification) -> Option<&str> {
    if classification.operation.is_file_write() {
        classification.display_target.as_deref()
    } else {
        None
    }
}
