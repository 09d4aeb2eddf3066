//! Error types shared across the crate.
//!
//! Protocol decode failures are deliberately absent: the parser skips bad
//! lines and never reports them past the session boundary.

use thiserror::Error;

/// Failures raised by a single agent process invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("Agent binary not found (searched: {searched})")]
    BinaryNotFound { searched: String },

    #[error("Failed to spawn agent: {0}")]
    Spawn(String),

    /// stderr output that matched the error heuristic.
    #[error("{0}")]
    Reported(String),

    #[error("Agent exited with code {code}")]
    ExitCode { code: i32 },
}

/// Failures from a message or session store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Failures starting or controlling a turn.
#[derive(Error, Debug)]
pub enum TurnError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("No active turn")]
    NoActiveTurn,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_message_includes_code() {
        let err = AgentError::ExitCode { code: 2 };
        assert_eq!(err.to_string(), "Agent exited with code 2");
    }

    #[test]
    fn reported_error_is_passed_through() {
        let err = AgentError::Reported("fatal: not a git repository".to_string());
        assert_eq!(err.to_string(), "fatal: not a git repository");
    }

    #[test]
    fn store_error_converts_into_turn_error() {
        let err: TurnError = StoreError::NotFound("msg-1".to_string()).into();
        assert!(matches!(err, TurnError::Store(StoreError::NotFound(_))));
    }
}
