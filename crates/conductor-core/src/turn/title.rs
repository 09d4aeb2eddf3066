//! Auxiliary single-shot turn that names a session.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::agents::event::TurnEvent;
use crate::config::PermissionMode;
use crate::event_bus::EventSink;
use crate::paths::AgentSearch;
use crate::persistence::Store;
use crate::session::{ProcessSession, SendRequest, SessionControl, SessionEvent};

/// Spend ceiling for the titling turn.
pub const TITLE_SPEND_CEILING: &str = "0.05";

pub const TITLE_SYSTEM_PROMPT: &str = "You name conversations. Reply with a title of at most \
six words for the conversation below. Output only the title: no quotes, no punctuation at the \
end, no explanation.";

const MAX_TITLE_CHARS: usize = 80;

/// Parameters for one titling run.
#[derive(Debug, Clone)]
pub struct TitleRequest {
    pub session_id: String,
    pub workspace_path: PathBuf,
    /// The first user message of the session.
    pub message: String,
    pub model: String,
    pub agent_path: Option<PathBuf>,
    pub agent_search: AgentSearch,
    pub log_dir: Option<PathBuf>,
}

impl TitleRequest {
    fn into_send_request(self) -> SendRequest {
        SendRequest {
            message: format!("Conversation:\n\n{}", self.message),
            workspace_path: self.workspace_path,
            resume_token: None,
            model: self.model,
            spend_ceiling: Some(TITLE_SPEND_CEILING.to_string()),
            system_prompt: Some(TITLE_SYSTEM_PROMPT.to_string()),
            permission_mode: PermissionMode::Plan,
            agent_path: self.agent_path,
            agent_search: self.agent_search,
            log_dir: self.log_dir,
        }
    }
}

/// Reduce agent output to a one-line title.
pub fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line.trim_start_matches(|c: char| matches!(c, '#' | '*' | ' '));
    let line = line.strip_prefix("Title:").unwrap_or(line);
    let line = line
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*'))
        .trim_end_matches('.')
        .trim();
    if line.is_empty() {
        return None;
    }
    Some(line.chars().take(MAX_TITLE_CHARS).collect())
}

/// A titling run in the background.
pub struct TitleTask {
    control: SessionControl,
    task: JoinHandle<()>,
}

impl TitleTask {
    /// Start the titling turn unless the session has been titled meanwhile.
    /// Must be called within a tokio runtime.
    pub fn start(request: TitleRequest, store: Arc<dyn Store>, sink: Arc<dyn EventSink>) -> Self {
        let session = ProcessSession::new();
        let control = session.control();
        let task = tokio::spawn(run_title(session, request, store, sink));
        Self { control, task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) {
        if let Err(err) = self.task.await {
            log::warn!("Title task failed: {}", err);
        }
    }

    /// Stop the run and wait for its process to go away. An interrupted run
    /// stores no title.
    pub async fn cancel(self) {
        self.control.cancel();
        self.wait().await;
    }
}

async fn run_title(
    mut session: ProcessSession,
    request: TitleRequest,
    store: Arc<dyn Store>,
    sink: Arc<dyn EventSink>,
) {
    let session_id = request.session_id.clone();
    let record = {
        let store = Arc::clone(&store);
        let session_id = session_id.clone();
        tokio::task::spawn_blocking(move || store.session(&session_id)).await
    };
    match record {
        Ok(Ok(Some(record))) if record.title.is_some() => return,
        Ok(Err(err)) => log::warn!("Failed to read session {}: {}", session_id, err),
        Err(err) => log::warn!("Title task for {} failed: {}", session_id, err),
        _ => {}
    }
    if session.control().cancel_requested() {
        return;
    }
    session.send(request.into_send_request());
    collect_title(session, session_id, store, sink).await;
}

async fn collect_title(
    mut session: ProcessSession,
    session_id: String,
    store: Arc<dyn Store>,
    sink: Arc<dyn EventSink>,
) {
    let mut text = String::new();
    let mut summary = None;
    while let Some(event) = session.next_event().await {
        match event {
            SessionEvent::TextDelta(delta) => text.push_str(&delta),
            SessionEvent::Result(result) => summary = result.summary_text,
            SessionEvent::Error(err) => log::warn!("Titling turn for {}: {}", session_id, err),
            _ => {}
        }
    }

    if summary.is_none() && session.control().cancel_requested() {
        log::info!("Titling turn for {} was cancelled", session_id);
        return;
    }

    let raw = summary.filter(|s| !s.trim().is_empty()).unwrap_or(text);
    let Some(title) = clean_title(&raw) else {
        log::info!("Titling turn for {} produced no title", session_id);
        return;
    };

    let stored = {
        let store = Arc::clone(&store);
        let session_id = session_id.clone();
        let title = title.clone();
        tokio::task::spawn_blocking(move || store.set_title(&session_id, &title)).await
    };
    match stored {
        Ok(Ok(())) => {
            log::info!("Titled session {}: {}", session_id, title);
            sink.publish(&session_id, TurnEvent::TitleUpdated { title });
        }
        Ok(Err(err)) => log::warn!("Failed to save title for {}: {}", session_id, err),
        Err(err) => log::warn!("Title task for {} failed: {}", session_id, err),
    }
}
