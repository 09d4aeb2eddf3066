//! JSON file store.
//!
//! # File Structure
//!
//! ```text
//! {data_dir}/sessions/{session_id}.json
//! ```
//!
//! All documents are loaded on open and kept in a [`MemoryStore`]. Every
//! mutation rewrites the affected document with write-then-rename, under one
//! lock, so writes to a message land on disk in the order they were made. A
//! mutation whose write fails is undone in the cache as well.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::memory::MemoryStore;
use super::store::{MessageStore, SessionStore};
use super::types::{
    ArtifactRecord, MessageContent, MessageRecord, Role, SessionDocument, SessionRecord,
    TurnAccounting,
};
use crate::agents::tools::ToolOperation;
use crate::error::StoreError;

pub struct FileStore {
    dir: PathBuf,
    cache: MemoryStore,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) the store under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let dir = data_dir.join("sessions");
        fs::create_dir_all(&dir)?;

        let cache = MemoryStore::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match load_document(&path) {
                    Ok(doc) => cache.insert_document(doc),
                    Err(err) => log::warn!("Skipping unreadable session {}: {}", path.display(), err),
                }
            }
        }

        Ok(Self {
            dir,
            cache,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.cache.session_ids()
    }

    fn document_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    /// Write one document atomically (temp file, then rename).
    fn save(&self, session_id: &str) -> Result<(), StoreError> {
        let Some(doc) = self.cache.document(session_id) else {
            return Err(StoreError::NotFound(format!("session {session_id}")));
        };
        let file_path = self.document_path(session_id);
        let temp_path = self.dir.join(format!("{session_id}.json.tmp"));
        fs::write(&temp_path, serde_json::to_string_pretty(&doc)?)?;
        fs::rename(&temp_path, &file_path)?;
        Ok(())
    }

    fn mutate_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&MemoryStore) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.apply(session_id, f)
    }

    fn mutate_message<T>(
        &self,
        message_id: &str,
        f: impl FnOnce(&MemoryStore) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let session_id = self
            .cache
            .session_of_message(message_id)
            .ok_or_else(|| StoreError::NotFound(format!("message {message_id}")))?;
        self.apply(&session_id, f)
    }

    /// Mutate the cached document and write it out, restoring the previous
    /// document if either step fails. Callers hold `write_lock`.
    fn apply<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&MemoryStore) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let before = self.cache.document(session_id);
        match f(&self.cache).and_then(|value| self.save(session_id).map(|()| value)) {
            Ok(value) => Ok(value),
            Err(err) => {
                match before {
                    Some(doc) => self.cache.insert_document(doc),
                    None => self.cache.remove_document(session_id),
                }
                Err(err)
            }
        }
    }
}

fn load_document(path: &Path) -> Result<SessionDocument, StoreError> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

impl MessageStore for FileStore {
    fn next_order(&self, session_id: &str) -> Result<u32, StoreError> {
        self.cache.next_order(session_id)
    }

    fn create_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        order: u32,
    ) -> Result<MessageRecord, StoreError> {
        self.mutate_session(session_id, |cache| {
            cache.create_message(session_id, role, content, order)
        })
    }

    fn update_streaming_content(
        &self,
        message_id: &str,
        content: &MessageContent,
    ) -> Result<(), StoreError> {
        self.mutate_message(message_id, |cache| {
            cache.update_streaming_content(message_id, content)
        })
    }

    fn finalize_message(
        &self,
        message_id: &str,
        content: &MessageContent,
        accounting: TurnAccounting,
    ) -> Result<(), StoreError> {
        self.mutate_message(message_id, |cache| {
            cache.finalize_message(message_id, content, accounting)
        })
    }

    fn delete_message(&self, message_id: &str) -> Result<(), StoreError> {
        match self.mutate_message(message_id, |cache| cache.delete_message(message_id)) {
            Err(StoreError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    fn messages(&self, session_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        self.cache.messages(session_id)
    }
}

impl SessionStore for FileStore {
    fn session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        self.cache.session(session_id)
    }

    fn create_session(
        &self,
        session_id: &str,
        workspace_path: &Path,
    ) -> Result<SessionRecord, StoreError> {
        self.mutate_session(session_id, |cache| {
            cache.create_session(session_id, workspace_path)
        })
    }

    fn set_resume_token(&self, session_id: &str, token: &str) -> Result<(), StoreError> {
        self.mutate_session(session_id, |cache| cache.set_resume_token(session_id, token))
    }

    fn set_title(&self, session_id: &str, title: &str) -> Result<(), StoreError> {
        self.mutate_session(session_id, |cache| cache.set_title(session_id, title))
    }

    fn touch(&self, session_id: &str) -> Result<(), StoreError> {
        self.mutate_session(session_id, |cache| cache.touch(session_id))
    }

    fn has_artifact(&self, session_id: &str, path: &str) -> Result<bool, StoreError> {
        self.cache.has_artifact(session_id, path)
    }

    fn create_artifact(
        &self,
        session_id: &str,
        path: &str,
        operation: ToolOperation,
    ) -> Result<ArtifactRecord, StoreError> {
        self.mutate_session(session_id, |cache| {
            cache.create_artifact(session_id, path, operation)
        })
    }

    fn artifacts(&self, session_id: &str) -> Result<Vec<ArtifactRecord>, StoreError> {
        self.cache.artifacts(session_id)
    }
}

// ============================================================================
// TESTS
// ============================================================================
