//! In-process store.
//!
//! Holds every session document in memory. Used directly by tests and
//! embedders that persist elsewhere, and as the cache behind
//! [`super::FileStore`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use super::store::{MessageStore, SessionStore};
use super::types::{
    ArtifactRecord, MessageContent, MessageRecord, Role, SessionDocument, SessionRecord,
    TurnAccounting,
};
use crate::agents::tools::ToolOperation;
use crate::error::StoreError;

#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, SessionDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionDocument>> {
        self.docs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionDocument) -> T,
    ) -> Result<T, StoreError> {
        let mut docs = self.lock();
        let doc = docs
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;
        Ok(f(doc))
    }

    fn with_message<T>(
        &self,
        message_id: &str,
        f: impl FnOnce(&mut MessageRecord) -> T,
    ) -> Result<T, StoreError> {
        let mut docs = self.lock();
        docs.values_mut()
            .find_map(|doc| doc.message_mut(message_id))
            .map(f)
            .ok_or_else(|| StoreError::NotFound(format!("message {message_id}")))
    }

    /// Snapshot of one session document.
    pub fn document(&self, session_id: &str) -> Option<SessionDocument> {
        self.lock().get(session_id).cloned()
    }

    /// Insert or replace a whole document.
    pub fn insert_document(&self, doc: SessionDocument) {
        self.lock().insert(doc.session.id.clone(), doc);
    }

    pub fn remove_document(&self, session_id: &str) {
        self.lock().remove(session_id);
    }

    /// Session that owns `message_id`.
    pub fn session_of_message(&self, message_id: &str) -> Option<String> {
        self.lock()
            .values()
            .find(|doc| doc.contains_message(message_id))
            .map(|doc| doc.session.id.clone())
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl MessageStore for MemoryStore {
    fn next_order(&self, session_id: &str) -> Result<u32, StoreError> {
        self.with_session(session_id, |doc| doc.next_order())
    }

    fn create_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        order: u32,
    ) -> Result<MessageRecord, StoreError> {
        self.with_session(session_id, |doc| {
            let message = MessageRecord::new(session_id, role, content, order);
            doc.messages.push(message.clone());
            message
        })
    }

    fn update_streaming_content(
        &self,
        message_id: &str,
        content: &MessageContent,
    ) -> Result<(), StoreError> {
        self.with_message(message_id, |message| message.apply_streaming(content))
    }

    fn finalize_message(
        &self,
        message_id: &str,
        content: &MessageContent,
        accounting: TurnAccounting,
    ) -> Result<(), StoreError> {
        self.with_message(message_id, |message| message.finalize(content, accounting))
    }

    fn delete_message(&self, message_id: &str) -> Result<(), StoreError> {
        for doc in self.lock().values_mut() {
            doc.messages.retain(|m| m.id != message_id);
        }
        Ok(())
    }

    fn messages(&self, session_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        self.with_session(session_id, |doc| doc.ordered_messages())
    }
}

impl SessionStore for MemoryStore {
    fn session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.lock().get(session_id).map(|doc| doc.session.clone()))
    }

    fn create_session(
        &self,
        session_id: &str,
        workspace_path: &Path,
    ) -> Result<SessionRecord, StoreError> {
        let session = SessionRecord::new(session_id, workspace_path);
        self.lock()
            .entry(session_id.to_string())
            .or_insert_with(|| SessionDocument::new(session.clone()));
        Ok(session)
    }

    fn set_resume_token(&self, session_id: &str, token: &str) -> Result<(), StoreError> {
        self.with_session(session_id, |doc| {
            doc.session.resume_token = Some(token.to_string());
        })
    }

    fn set_title(&self, session_id: &str, title: &str) -> Result<(), StoreError> {
        self.with_session(session_id, |doc| {
            doc.session.title = Some(title.to_string());
        })
    }

    fn touch(&self, session_id: &str) -> Result<(), StoreError> {
        self.with_session(session_id, |doc| {
            doc.session.last_activity_at = Utc::now();
        })
    }

    fn has_artifact(&self, session_id: &str, path: &str) -> Result<bool, StoreError> {
        self.with_session(session_id, |doc| doc.has_artifact(path))
    }

    fn create_artifact(
        &self,
        session_id: &str,
        path: &str,
        operation: ToolOperation,
    ) -> Result<ArtifactRecord, StoreError> {
        self.with_session(session_id, |doc| {
            if let Some(existing) = doc.artifacts.iter().find(|a| a.path == path) {
                return existing.clone();
            }
            let artifact = ArtifactRecord::new(session_id, path, operation);
            doc.artifacts.push(artifact.clone());
            artifact
        })
    }

    fn artifacts(&self, session_id: &str) -> Result<Vec<ArtifactRecord>, StoreError> {
        self.with_session(session_id, |doc| doc.artifacts.clone())
    }
}

// ============================================================================
// TESTS
// ============================================================================
