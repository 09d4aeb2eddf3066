//! Shared fixtures: fake agent scripts, a recording sink, a counting store.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use conductor_core::paths::AgentSearch;
use conductor_core::persistence::{
    ArtifactRecord, MessageContent, MessageRecord, Role, SessionRecord, TurnAccounting,
};
use conductor_core::{
    EventSink, MemoryStore, MessageStore, PermissionMode, SessionStore, Settings,
    SettingsProvider, StoreError, ToolOperation, TurnEvent,
};

pub const SESSION: &str = "session-1";

/// Write an executable `/bin/sh` script standing in for the agent.
///
/// The prompt is the last argument; scripts read it with
/// `for prompt; do :; done`.
pub fn fake_agent(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("agent");
    fs::write(&path, format!("#!/bin/sh\nfor prompt; do :; done\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A `printf` line emitting one assistant text chunk.
pub fn text_line(text: &str) -> String {
    format!(
        r#"printf '%s\n' '{{"type":"assistant","message":{{"content":[{{"type":"text","text":"{}"}}]}}}}'"#,
        text
    )
}

/// A `printf` line emitting one tool_use block.
pub fn tool_line(id: &str, name: &str, file_path: &str) -> String {
    format!(
        r#"printf '%s\n' '{{"type":"assistant","message":{{"content":[{{"type":"tool_use","id":"{}","name":"{}","input":{{"file_path":"{}"}}}}]}}}}'"#,
        id, name, file_path
    )
}

/// A `printf` line emitting the result record.
pub fn result_line(session_token: &str, summary: &str) -> String {
    format!(
        r#"printf '%s\n' '{{"type":"result","session_id":"{}","result":"{}","total_cost_usd":0.02,"usage":{{"input_tokens":10,"output_tokens":5}}}}'"#,
        session_token, summary
    )
}

/// Settings that only ever run the given agent, never one found on the
/// host.
pub struct TestSettings(pub Settings);

impl SettingsProvider for TestSettings {
    fn model(&self) -> String {
        self.0.model()
    }

    fn spend_ceiling(&self) -> Option<String> {
        self.0.spend_ceiling()
    }

    fn system_prompt(&self) -> Option<String> {
        self.0.system_prompt()
    }

    fn permission_mode(&self) -> PermissionMode {
        self.0.permission_mode()
    }

    fn agent_path(&self) -> Option<PathBuf> {
        self.0.agent_path()
    }

    fn agent_search(&self) -> AgentSearch {
        AgentSearch::override_only()
    }

    fn log_dir(&self) -> Option<PathBuf> {
        self.0.log_dir()
    }
}

pub fn settings(agent: &Path, mode: PermissionMode) -> Arc<TestSettings> {
    Arc::new(TestSettings(Settings {
        agent_path: Some(agent.to_path_buf()),
        permission_mode: mode,
        ..Settings::default()
    }))
}

/// A store with one titled session, so turns do not start a titling run.
pub fn titled_store(workspace: &Path) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.create_session(SESSION, workspace).unwrap();
    store.set_title(SESSION, "Existing title").unwrap();
    store
}

/// Poll `condition` until it holds, failing after five seconds.
pub async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, TurnEvent)>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<TurnEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&TurnEvent) -> bool) -> usize {
        self.events().iter().filter(|e| matches(e)).count()
    }

    pub fn position(&self, matches: impl Fn(&TurnEvent) -> bool) -> Option<usize> {
        self.events().iter().position(|e| matches(e))
    }

    pub fn sessions(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, session_id: &str, event: TurnEvent) {
        self.events
            .lock()
            .unwrap()
            .push((session_id.to_string(), event));
    }
}

/// Delegates to a [`MemoryStore`], counting streaming writes.
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    streaming_writes: AtomicUsize,
}

impl CountingStore {
    pub fn streaming_writes(&self) -> usize {
        self.streaming_writes.load(Ordering::SeqCst)
    }
}

impl MessageStore for CountingStore {
    fn next_order(&self, session_id: &str) -> Result<u32, StoreError> {
        self.inner.next_order(session_id)
    }

    fn create_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        order: u32,
    ) -> Result<MessageRecord, StoreError> {
        self.inner.create_message(session_id, role, content, order)
    }

    fn update_streaming_content(
        &self,
        message_id: &str,
        content: &MessageContent,
    ) -> Result<(), StoreError> {
        self.streaming_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update_streaming_content(message_id, content)
    }

    fn finalize_message(
        &self,
        message_id: &str,
        content: &MessageContent,
        accounting: TurnAccounting,
    ) -> Result<(), StoreError> {
        self.inner.finalize_message(message_id, content, accounting)
    }

    fn delete_message(&self, message_id: &str) -> Result<(), StoreError> {
        self.inner.delete_message(message_id)
    }

    fn messages(&self, session_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        self.inner.messages(session_id)
    }
}

impl SessionStore for CountingStore {
    fn session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        self.inner.session(session_id)
    }

    fn create_session(
        &self,
        session_id: &str,
        workspace_path: &Path,
    ) -> Result<SessionRecord, StoreError> {
        self.inner.create_session(session_id, workspace_path)
    }

    fn set_resume_token(&self, session_id: &str, token: &str) -> Result<(), StoreError> {
        self.inner.set_resume_token(session_id, token)
    }

    fn set_title(&self, session_id: &str, title: &str) -> Result<(), StoreError> {
        self.inner.set_title(session_id, title)
    }

    fn touch(&self, session_id: &str) -> Result<(), StoreError> {
        self.inner.touch(session_id)
    }

    fn has_artifact(&self, session_id: &str, path: &str) -> Result<bool, StoreError> {
        self.inner.has_artifact(session_id, path)
    }

    fn create_artifact(
        &self,
        session_id: &str,
        path: &str,
        operation: ToolOperation,
    ) -> Result<ArtifactRecord, StoreError> {
        self.inner.create_artifact(session_id, path, operation)
    }

    fn artifacts(&self, session_id: &str) -> Result<Vec<ArtifactRecord>, StoreError> {
        self.inner.artifacts(session_id)
    }
}
