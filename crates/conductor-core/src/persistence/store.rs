//! Store traits consumed by the turn orchestrator.

use std::path::Path;

use super::types::{
    ArtifactRecord, MessageContent, MessageRecord, Role, SessionRecord, TurnAccounting,
};
use crate::agents::tools::ToolOperation;
use crate::error::StoreError;

/// Conversation messages keyed by session.
pub trait MessageStore: Send + Sync {
    /// Order for the next message appended to `session_id`.
    fn next_order(&self, session_id: &str) -> Result<u32, StoreError>;

    fn create_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        order: u32,
    ) -> Result<MessageRecord, StoreError>;

    /// Overwrite the body of a message that is still streaming.
    fn update_streaming_content(
        &self,
        message_id: &str,
        content: &MessageContent,
    ) -> Result<(), StoreError>;

    /// Write the final body and accounting, and clear the streaming flag.
    fn finalize_message(
        &self,
        message_id: &str,
        content: &MessageContent,
        accounting: TurnAccounting,
    ) -> Result<(), StoreError>;

    /// Delete a message. Deleting a missing message is not an error.
    fn delete_message(&self, message_id: &str) -> Result<(), StoreError>;

    /// All messages of a session, by order.
    fn messages(&self, session_id: &str) -> Result<Vec<MessageRecord>, StoreError>;
}

/// Session metadata and artifacts.
pub trait SessionStore: Send + Sync {
    fn session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError>;

    fn create_session(
        &self,
        session_id: &str,
        workspace_path: &Path,
    ) -> Result<SessionRecord, StoreError>;

    fn set_resume_token(&self, session_id: &str, token: &str) -> Result<(), StoreError>;

    fn set_title(&self, session_id: &str, title: &str) -> Result<(), StoreError>;

    /// Bump the last-activity timestamp.
    fn touch(&self, session_id: &str) -> Result<(), StoreError>;

    fn has_artifact(&self, session_id: &str, path: &str) -> Result<bool, StoreError>;

    fn create_artifact(
        &self,
        session_id: &str,
        path: &str,
        operation: ToolOperation,
    ) -> Result<ArtifactRecord, StoreError>;

    fn artifacts(&self, session_id: &str) -> Result<Vec<ArtifactRecord>, StoreError>;
}

/// A backend providing both message and session storage.
pub trait Store: MessageStore + SessionStore {}

impl<T: MessageStore + SessionStore> Store for T {}
