//! Turn orchestration.
//!
//! [`TurnOrchestrator::send`] drives one conversational turn:
//!
//! 1. Cancel any active turn and pending titling run, and wait for their
//!    final writes and for their processes to exit.
//! 2. Persist the user message and an empty assistant placeholder.
//! 3. Start a [`ProcessSession`] and a turn loop that owns the
//!    [`AccumulatedTurnState`].
//!
//! The turn loop is the only place that touches the accumulators. Writes to
//! the placeholder go through a [`PlaceholderWriter`] so they reach the
//! store in order.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::state::AccumulatedTurnState;
use super::title::{TitleRequest, TitleTask};
use super::writer::PlaceholderWriter;
use crate::agents::event::{DoneReason, ToolCall, TurnEvent};
use crate::agents::tools::{artifact_path, classify, ToolClassification};
use crate::config::{PermissionMode, SettingsProvider};
use crate::error::{AgentError, TurnError};
use crate::event_bus::EventSink;
use crate::persistence::{Role, Store, TurnAccounting};
use crate::session::{
    ProcessSession, ResultSummary, SendRequest, SessionControl, SessionHandler, SessionState,
    KILL_GRACE_PERIOD,
};

/// Upper bound on waiting for a cancelled turn's process to exit.
const EXIT_WAIT: Duration = KILL_GRACE_PERIOD.saturating_add(Duration::from_secs(1));

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TurnOutcome {
    /// The agent delivered a result.
    Completed,
    /// The agent exited without a result or an error.
    Exited,
    /// An error was reported and no result followed.
    Errored,
    /// The host cancelled the turn.
    Cancelled,
}

/// Resolves once a turn has reached its outcome and every write for it has
/// landed.
pub struct TurnCompletion {
    rx: oneshot::Receiver<TurnOutcome>,
}

impl Future for TurnCompletion {
    type Output = TurnOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(TurnOutcome::Cancelled))
    }
}

enum TurnCommand {
    Cancel,
}

struct ActiveTurn {
    session_id: String,
    control: SessionControl,
    commands: mpsc::UnboundedSender<TurnCommand>,
    task: JoinHandle<()>,
}

impl ActiveTurn {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel and wait for the turn loop, including its final write, then
    /// for the agent process to exit.
    async fn cancel(self) {
        log::info!("Cancelling active turn for session {}", self.session_id);
        let _ = self.commands.send(TurnCommand::Cancel);
        self.control.cancel();
        if let Err(err) = self.task.await {
            log::warn!("Turn task for {} failed: {}", self.session_id, err);
        }
        if tokio::time::timeout(EXIT_WAIT, self.control.wait_exit())
            .await
            .is_err()
        {
            log::warn!(
                "Agent for session {} still running after {:?}",
                self.session_id,
                EXIT_WAIT
            );
        }
    }
}

type BackgroundTasks = Arc<StdMutex<Vec<TitleTask>>>;

/// Drives turns for one host. At most one turn is active at a time.
pub struct TurnOrchestrator {
    store: Arc<dyn Store>,
    settings: Arc<dyn SettingsProvider>,
    sink: Arc<dyn EventSink>,
    active: Mutex<Option<ActiveTurn>>,
    background: BackgroundTasks,
}

impl TurnOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        settings: Arc<dyn SettingsProvider>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            settings,
            sink,
            active: Mutex::new(None),
            background: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    /// Start a turn. Any active turn is cancelled first.
    ///
    /// Returns once the agent has been started; await the returned
    /// [`TurnCompletion`] for the outcome.
    pub async fn send(&self, session_id: &str, content: &str) -> Result<TurnCompletion, TurnError> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.cancel().await;
        }
        for title in self.take_background() {
            title.cancel().await;
        }

        let session = self
            .store
            .session(session_id)?
            .ok_or_else(|| TurnError::SessionNotFound(session_id.to_string()))?;

        let order = self.store.next_order(session_id)?;
        self.store.create_message(session_id, Role::User, content, order)?;
        let placeholder = self
            .store
            .create_message(session_id, Role::Assistant, "", order + 1)?;

        let model = self.settings.model();
        let permission_mode = self.settings.permission_mode();
        let agent_path = self.settings.agent_path();
        let agent_search = self.settings.agent_search();
        let log_dir = self.settings.log_dir();

        let title = session.title.is_none().then(|| TitleRequest {
            session_id: session_id.to_string(),
            workspace_path: session.workspace_path.clone(),
            message: content.to_string(),
            model: model.clone(),
            agent_path: agent_path.clone(),
            agent_search: agent_search.clone(),
            log_dir: log_dir.clone(),
        });

        let request = SendRequest {
            message: content.to_string(),
            workspace_path: session.workspace_path.clone(),
            resume_token: session.resume_token.clone(),
            model,
            spend_ceiling: self.settings.spend_ceiling(),
            system_prompt: self.settings.system_prompt(),
            permission_mode,
            agent_path,
            agent_search,
            log_dir,
        };

        let mut process = ProcessSession::new();
        let control = process.control();
        let handler = TurnHandler {
            session_id: session_id.to_string(),
            state: AccumulatedTurnState::new(placeholder.id.clone(), Instant::now()),
            writer: PlaceholderWriter::spawn(Arc::clone(&self.store), placeholder.id),
            store: Arc::clone(&self.store),
            sink: Arc::clone(&self.sink),
            control: control.clone(),
            permission_mode,
            title,
            background: Arc::clone(&self.background),
            outcome: None,
            errored: false,
        };

        log::info!(
            "Starting turn {} for session {} in {}",
            process.id(),
            session_id,
            session.workspace_path.display()
        );
        process.send(request);

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let task = tokio::spawn(run_turn(process, handler, commands_rx, done_tx));

        *active = Some(ActiveTurn {
            session_id: session_id.to_string(),
            control,
            commands: commands_tx,
            task,
        });

        Ok(TurnCompletion { rx: done_rx })
    }

    /// Cancel the active turn, flushing what it accumulated.
    ///
    /// Returns false if no turn was running.
    pub async fn cancel_current(&self) -> bool {
        let Some(turn) = self.active.lock().await.take() else {
            return false;
        };
        let was_running = turn.is_running();
        turn.cancel().await;
        was_running
    }

    pub async fn suspend_current(&self) -> Result<(), TurnError> {
        self.with_running(SessionControl::suspend).await
    }

    pub async fn resume_current(&self) -> Result<(), TurnError> {
        self.with_running(SessionControl::resume).await
    }

    async fn with_running(&self, f: impl FnOnce(&SessionControl)) -> Result<(), TurnError> {
        match self.active.lock().await.as_ref() {
            Some(turn) if turn.is_running() => {
                f(&turn.control);
                Ok(())
            }
            _ => Err(TurnError::NoActiveTurn),
        }
    }

    /// Whether a turn is in flight.
    pub async fn is_busy(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(ActiveTurn::is_running)
    }

    /// Process state of the active turn, if any.
    pub async fn current_state(&self) -> Option<SessionState> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|turn| turn.control.state())
    }

    /// Session id of the active turn, if any.
    pub async fn current_session(&self) -> Option<String> {
        self.active
            .lock()
            .await
            .as_ref()
            .filter(|turn| turn.is_running())
            .map(|turn| turn.session_id.clone())
    }

    /// Wait for background work (session titling) to finish.
    pub async fn wait_background(&self) {
        for title in self.take_background() {
            title.wait().await;
        }
    }

    fn take_background(&self) -> Vec<TitleTask> {
        let mut guard = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        guard.drain(..).collect()
    }
}

async fn run_turn(
    mut process: ProcessSession,
    mut handler: TurnHandler,
    mut commands: mpsc::UnboundedReceiver<TurnCommand>,
    done_tx: oneshot::Sender<TurnOutcome>,
) {
    loop {
        tokio::select! {
            biased;
            Some(command) = commands.recv() => match command {
                TurnCommand::Cancel => {
                    handler.on_cancel();
                    break;
                }
            },
            event = process.next_event() => match event {
                Some(event) => event.dispatch(&mut handler),
                None => {
                    handler.on_stream_closed();
                    break;
                }
            },
        }
    }

    let outcome = handler.finish().await;
    log::info!("Turn {} ended: {:?}", process.id(), outcome);
    let _ = done_tx.send(outcome);
}

/// Session callbacks for one turn.
struct TurnHandler {
    session_id: String,
    state: AccumulatedTurnState,
    writer: PlaceholderWriter,
    store: Arc<dyn Store>,
    sink: Arc<dyn EventSink>,
    control: SessionControl,
    permission_mode: PermissionMode,
    title: Option<TitleRequest>,
    background: BackgroundTasks,
    outcome: Option<TurnOutcome>,
    errored: bool,
}

impl TurnHandler {
    fn publish(&self, event: TurnEvent) {
        self.sink.publish(&self.session_id, event);
    }

    fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    fn persist_debounced(&mut self) {
        if self.state.persist_due(Instant::now()) {
            self.writer.update(self.state.snapshot());
        }
    }

    fn persist_now(&mut self) {
        self.state.persisted(Instant::now());
        self.writer.update(self.state.snapshot());
    }

    /// Create the artifact for a file write if the session has none for
    /// its path yet.
    ///
    /// The check runs on the writer queue, so two calls for one path in a
    /// turn still create one artifact.
    fn ensure_artifact(&self, classification: &ToolClassification) {
        let Some(path) = artifact_path(classification) else {
            return;
        };
        let session_id = self.session_id.clone();
        let path = path.to_string();
        let operation = classification.operation;
        let sink = Arc::clone(&self.sink);
        self.writer.session(
            "record artifact",
            Box::new(move |store: &dyn Store| {
                if store.has_artifact(&session_id, &path)? {
                    return Ok(());
                }
                let artifact = store.create_artifact(&session_id, &path, operation)?;
                sink.publish(
                    &session_id,
                    TurnEvent::ArtifactCreated {
                        path: artifact.path,
                        operation: artifact.operation,
                    },
                );
                Ok(())
            }),
        );
    }

    fn reconcile_artifacts(&self) {
        for call in self.state.tool_calls() {
            let classification = classify(&call.name, &call.input, self.permission_mode);
            self.ensure_artifact(&classification);
        }
    }

    fn spawn_titling(&mut self) {
        let Some(request) = self.title.take() else {
            return;
        };
        let title = TitleTask::start(request, Arc::clone(&self.store), Arc::clone(&self.sink));
        let mut tasks = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|t| !t.is_finished());
        tasks.push(title);
    }

    /// Finalize with what was accumulated, deleting an empty placeholder.
    fn flush_final(&self) {
        self.writer
            .finalize_or_delete(self.state.snapshot(), TurnAccounting::default());
    }

    fn on_cancel(&mut self) {
        if self.is_finished() {
            return;
        }
        self.control.cancel();
        self.flush_final();
        self.outcome = Some(TurnOutcome::Cancelled);
        self.publish(TurnEvent::Done {
            reason: DoneReason::Cancelled,
        });
    }

    /// The event stream ended.
    fn on_stream_closed(&mut self) {
        if !self.is_finished() {
            self.end_without_result();
        }
    }

    fn end_without_result(&mut self) {
        self.flush_final();
        self.outcome = Some(if self.errored {
            TurnOutcome::Errored
        } else {
            TurnOutcome::Exited
        });
        self.publish(TurnEvent::Done {
            reason: DoneReason::Exited,
        });
    }

    async fn finish(self) -> TurnOutcome {
        let outcome = self.outcome.unwrap_or(TurnOutcome::Exited);
        self.writer.close().await;
        outcome
    }
}

impl SessionHandler for TurnHandler {
    fn on_system(&mut self, session_token: Option<&str>, model: Option<&str>) {
        log::debug!(
            "Agent session {:?} using model {:?} for {}",
            session_token,
            model,
            self.session_id
        );
    }

    fn on_text_delta(&mut self, text: &str) {
        if self.is_finished() {
            return;
        }
        self.state.push_text(text);
        self.publish(TurnEvent::TextDelta {
            text: text.to_string(),
        });
        self.persist_debounced();
    }

    fn on_thinking_delta(&mut self, text: &str) {
        if self.is_finished() {
            return;
        }
        self.state.push_thinking(text);
        self.publish(TurnEvent::ThinkingDelta {
            text: text.to_string(),
        });
        self.persist_debounced();
    }

    fn on_tool_call(&mut self, call: ToolCall) {
        if self.is_finished() {
            return;
        }
        let classification = classify(&call.name, &call.input, self.permission_mode);
        self.publish(TurnEvent::tool_call(&call, &classification));
        self.state.push_tool_call(call.clone());
        self.persist_now();

        self.ensure_artifact(&classification);

        if classification.requires_suspend {
            log::info!(
                "Suspending agent for {} ({:?} {:?})",
                call.name,
                classification.operation,
                classification.display_target
            );
            self.control.suspend();
            self.publish(TurnEvent::permission_required(&call, &classification));
        }
    }

    fn on_result(&mut self, result: ResultSummary) {
        if self.is_finished() {
            return;
        }
        self.outcome = Some(TurnOutcome::Completed);

        if let Some(token) = result.session_token.filter(|t| !t.is_empty()) {
            let session_id = self.session_id.clone();
            self.writer.session(
                "save resume token",
                Box::new(move |store: &dyn Store| store.set_resume_token(&session_id, &token)),
            );
        }

        self.writer.finalize_or_delete(
            self.state.snapshot(),
            TurnAccounting {
                tokens: result.usage.map(|u| u.total()),
                cost_usd: result.cost_usd,
            },
        );

        self.reconcile_artifacts();

        let session_id = self.session_id.clone();
        self.writer
            .session("touch session", Box::new(move |store: &dyn Store| store.touch(&session_id)));

        self.spawn_titling();

        self.publish(TurnEvent::Done {
            reason: DoneReason::Completed,
        });
    }

    fn on_error(&mut self, error: AgentError) {
        if self.is_finished() {
            return;
        }
        log::warn!("Turn error for {}: {}", self.session_id, error);
        self.errored = true;
        self.publish(TurnEvent::Error {
            message: error.to_string(),
        });
    }

    fn on_process_exit(&mut self, code: Option<i32>) {
        if self.is_finished() {
            return;
        }
        log::info!("Agent exited ({:?}) without a result for {}", code, self.session_id);
        self.end_without_result();
    }
}
