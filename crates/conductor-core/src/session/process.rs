//! One agent invocation: spawn, stream, control, exit.
//!
//! Three background tasks run per invocation:
//! - the stdout reader, which recovers lines and feeds the parser
//! - the stderr reader, which surfaces error-looking lines
//! - the supervisor, which owns the child, waits for exit, and performs
//!   forced kills
//!
//! All of them report through one channel, so a consumer sees events in the
//! order they were produced and never concurrently.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use super::state::{SessionMachine, SessionState};
use crate::agents::claude::{ClaudeConfig, ClaudeParser, LineBuffer};
use crate::agents::event::{ContentBlock, ProtocolEvent, ToolCall, Usage};
use crate::config::PermissionMode;
use crate::error::AgentError;
use crate::logging::Transcript;
use crate::paths::AgentSearch;
use crate::spawn::{signal_process, AgentProcess, ExitInfo, ProcessSignal};

/// Time a cancelled process gets to exit before it is force-killed.
pub const KILL_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// How long to wait for the output pipes to drain after the process exits.
/// Grandchildren can hold the pipes open indefinitely.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const READ_CHUNK_SIZE: usize = 8192;

/// Stderr lines matching this are surfaced as errors.
static STDERR_ERROR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)error|fatal").unwrap());

/// Everything needed to start one agent invocation.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub message: String,
    pub workspace_path: PathBuf,
    pub resume_token: Option<String>,
    pub model: String,
    pub spend_ceiling: Option<String>,
    pub system_prompt: Option<String>,
    pub permission_mode: PermissionMode,
    /// Explicit agent binary, checked before `agent_search`.
    pub agent_path: Option<PathBuf>,
    pub agent_search: AgentSearch,
    /// Directory for the protocol transcript; `None` disables it.
    pub log_dir: Option<PathBuf>,
}

/// Summary delivered with the terminal success event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSummary {
    pub session_token: Option<String>,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    pub usage: Option<Usage>,
    pub summary_text: Option<String>,
}

/// Event delivered to a session consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    System {
        session_token: Option<String>,
        model: Option<String>,
    },
    TextDelta(String),
    ThinkingDelta(String),
    ToolCall(ToolCall),
    Result(ResultSummary),
    Error(AgentError),
    /// The process ended without delivering a result.
    ProcessExit { code: Option<i32> },
}

impl SessionEvent {
    /// Expand a protocol event into consumer events, one per content block.
    pub fn from_protocol(event: ProtocolEvent) -> Vec<SessionEvent> {
        match event {
            ProtocolEvent::System {
                session_token,
                model,
                ..
            } => vec![SessionEvent::System {
                session_token,
                model,
            }],
            ProtocolEvent::AssistantChunk { blocks } => blocks
                .into_iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => SessionEvent::TextDelta(text),
                    ContentBlock::Thinking { thinking } => SessionEvent::ThinkingDelta(thinking),
                    ContentBlock::ToolUse { id, name, input } => {
                        SessionEvent::ToolCall(ToolCall { id, name, input })
                    }
                })
                .collect(),
            ProtocolEvent::Result {
                session_token,
                cost_usd,
                duration_ms,
                usage,
                summary_text,
            } => vec![SessionEvent::Result(ResultSummary {
                session_token,
                cost_usd,
                duration_ms,
                usage,
                summary_text,
            })],
        }
    }

    /// Hand this event to the matching handler method.
    pub fn dispatch<H: SessionHandler + ?Sized>(self, handler: &mut H) {
        match self {
            SessionEvent::System {
                session_token,
                model,
            } => handler.on_system(session_token.as_deref(), model.as_deref()),
            SessionEvent::TextDelta(text) => handler.on_text_delta(&text),
            SessionEvent::ThinkingDelta(text) => handler.on_thinking_delta(&text),
            SessionEvent::ToolCall(call) => handler.on_tool_call(call),
            SessionEvent::Result(result) => handler.on_result(result),
            SessionEvent::Error(error) => handler.on_error(error),
            SessionEvent::ProcessExit { code } => handler.on_process_exit(code),
        }
    }
}

/// Callbacks for a session consumer. Invoked sequentially, in order.
pub trait SessionHandler {
    fn on_system(&mut self, _session_token: Option<&str>, _model: Option<&str>) {}
    fn on_text_delta(&mut self, text: &str);
    fn on_thinking_delta(&mut self, text: &str);
    fn on_tool_call(&mut self, call: ToolCall);
    fn on_result(&mut self, result: ResultSummary);
    fn on_error(&mut self, error: AgentError);
    fn on_process_exit(&mut self, code: Option<i32>);
}

struct ControlInner {
    machine: SessionMachine,
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
}

/// Cloneable handle for suspending, resuming and cancelling a session.
#[derive(Clone)]
pub struct SessionControl {
    inner: Arc<Mutex<ControlInner>>,
    /// Flips to true once the process has been reaped, or will never run.
    exited: Arc<watch::Sender<bool>>,
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionControl {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ControlInner {
                machine: SessionMachine::new(),
                pid: None,
                kill_tx: None,
            })),
            exited: Arc::new(watch::channel(false).0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControlInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        self.lock().machine.state()
    }

    pub fn is_suspended(&self) -> bool {
        self.state() == SessionState::Suspended
    }

    pub fn cancel_requested(&self) -> bool {
        self.lock().machine.cancel_requested()
    }

    /// Pid of the live process. Cleared as soon as the process is reaped.
    pub fn pid(&self) -> Option<u32> {
        self.lock().pid
    }

    /// Wait until no process is left running for this session.
    ///
    /// Returns at once for a session that was never sent or failed to start.
    pub async fn wait_exit(&self) {
        if self.state() == SessionState::NotStarted {
            return;
        }
        let mut exited = self.exited.subscribe();
        let _ = exited.wait_for(|exited| *exited).await;
    }

    /// Pause the process (SIGSTOP). No-op unless running.
    pub fn suspend(&self) {
        let mut inner = self.lock();
        if inner.pid.is_none() {
            return;
        }
        if let (Some(signal), Some(pid)) = (inner.machine.suspend(), inner.pid) {
            log::info!("Suspending agent pid {}", pid);
            signal_process(pid, signal);
        }
    }

    /// Continue a suspended process (SIGCONT). No-op unless suspended.
    pub fn resume(&self) {
        let mut inner = self.lock();
        if let (Some(signal), Some(pid)) = (inner.machine.resume(), inner.pid) {
            log::info!("Resuming agent pid {}", pid);
            signal_process(pid, signal);
        }
    }

    /// Request graceful termination, escalating to a forced kill after
    /// [`KILL_GRACE_PERIOD`].
    pub fn cancel(&self) {
        let signals = {
            let mut inner = self.lock();
            let signals = inner.machine.cancel();
            if let Some(pid) = inner.pid {
                log::info!("Cancelling agent pid {}", pid);
            }
            signals
        };
        self.deliver(signals);
    }

    fn deliver(&self, signals: Vec<ProcessSignal>) {
        if signals.is_empty() {
            return;
        }
        let Some(pid) = self.pid() else {
            return;
        };
        let mut terminated = false;
        for signal in signals {
            let sent = signal_process(pid, signal);
            if signal == ProcessSignal::Terminate {
                terminated = sent;
            }
        }
        if terminated {
            self.schedule_kill();
        } else {
            self.force_kill();
        }
    }

    fn schedule_kill(&self) {
        let control = self.clone();
        let escalate = async move {
            tokio::time::sleep(KILL_GRACE_PERIOD).await;
            control.force_kill();
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(escalate);
            }
            Err(_) => {
                let control = self.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(KILL_GRACE_PERIOD);
                    control.force_kill();
                });
            }
        }
    }

    /// Ask the supervisor to kill the child if it is still alive.
    fn force_kill(&self) {
        let mut inner = self.lock();
        if inner.machine.state().is_terminal() {
            return;
        }
        if let Some(kill_tx) = inner.kill_tx.take() {
            log::warn!("Agent did not exit in time, killing pid {:?}", inner.pid);
            let _ = kill_tx.send(());
        }
    }

    fn attach(&self, pid: Option<u32>, kill_tx: oneshot::Sender<()>) {
        let signals = {
            let mut inner = self.lock();
            inner.pid = pid;
            inner.kill_tx = Some(kill_tx);
            inner.machine.start()
        };
        self.deliver(signals);
    }

    fn fail(&self) {
        self.lock().machine.fail();
        self.exited.send_replace(true);
    }

    /// The child has been waited on; its pid may be reused from now on.
    fn reaped(&self) {
        self.lock().pid = None;
        self.exited.send_replace(true);
    }

    fn finish(&self, errored: bool) -> SessionState {
        let mut inner = self.lock();
        inner.kill_tx = None;
        inner.machine.finish(errored)
    }
}

/// A single agent invocation.
pub struct ProcessSession {
    id: String,
    control: SessionControl,
    events_tx: Option<mpsc::UnboundedSender<SessionEvent>>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Default for ProcessSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSession {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            id: Uuid::new_v4().to_string(),
            control: SessionControl::new(),
            events_tx: Some(events_tx),
            events_rx,
        }
    }

    /// Identifier of this invocation, also used as the transcript name.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn control(&self) -> SessionControl {
        self.control.clone()
    }

    pub fn state(&self) -> SessionState {
        self.control.state()
    }

    /// Start the agent. Must be called from within a tokio runtime.
    ///
    /// A session runs at most one invocation; later calls are ignored.
    /// Failures are reported as [`SessionEvent::Error`], after which the
    /// event stream ends.
    pub fn send(&mut self, request: SendRequest) {
        let Some(events_tx) = self.events_tx.take() else {
            log::warn!("Session {} already started, ignoring send", self.id);
            return;
        };

        let binary_path = match request.agent_search.resolve(request.agent_path.as_deref()) {
            Ok(path) => path,
            Err(searched) => {
                log::warn!("Agent binary not found (searched {})", searched);
                self.control.fail();
                let _ = events_tx.send(SessionEvent::Error(AgentError::BinaryNotFound { searched }));
                return;
            }
        };

        let spawn_config = ClaudeConfig {
            binary_path,
            working_dir: request.workspace_path,
            prompt: request.message,
            resume_token: request.resume_token,
            model: request.model,
            spend_ceiling: request.spend_ceiling,
            system_prompt: request.system_prompt,
            permission_mode: request.permission_mode,
        }
        .build();

        let transcript = Transcript::open(request.log_dir.as_deref(), &self.id);
        transcript.line(
            "ARGS",
            &format!("{} {}", spawn_config.binary_path.display(), spawn_config.args.join(" ")),
        );

        let process = match AgentProcess::spawn(&spawn_config) {
            Ok(process) => process,
            Err(err) => {
                log::warn!("Failed to spawn agent: {}", err);
                self.control.fail();
                let _ = events_tx.send(SessionEvent::Error(err));
                return;
            }
        };
        log::info!(
            "Started agent session {} (pid {:?}) in {}",
            self.id,
            process.pid(),
            spawn_config
                .working_dir
                .as_deref()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default()
        );

        let (kill_tx, kill_rx) = oneshot::channel();
        self.control.attach(process.pid(), kill_tx);

        supervise(process, self.control.clone(), events_tx, transcript, kill_rx);
    }

    /// Next event, or `None` once the invocation is over.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        // Never sent: drop our sender so the stream ends instead of hanging.
        self.events_tx.take();
        self.events_rx.recv().await
    }

    /// Dispatch every event to `handler` until the stream ends.
    pub async fn run<H: SessionHandler + ?Sized>(mut self, handler: &mut H) {
        while let Some(event) = self.next_event().await {
            event.dispatch(handler);
        }
    }
}

fn supervise(
    process: AgentProcess,
    control: SessionControl,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    transcript: Transcript,
    mut kill_rx: oneshot::Receiver<()>,
) {
    let AgentProcess {
        mut child,
        stdout,
        stderr,
    } = process;

    let result_seen = Arc::new(AtomicBool::new(false));
    let stdout_task = tokio::spawn(read_stdout(
        stdout,
        events_tx.clone(),
        transcript.clone(),
        Arc::clone(&result_seen),
    ));
    let stderr_task = tokio::spawn(read_stderr(stderr, events_tx.clone(), transcript.clone()));

    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = &mut kill_rx => {
                if let Err(err) = child.start_kill() {
                    log::warn!("Failed to kill agent: {}", err);
                }
                child.wait().await
            }
        };

        let exit = match status {
            Ok(status) => Some(ExitInfo::from_status(&status)),
            Err(err) => {
                log::warn!("Failed to wait for agent: {}", err);
                None
            }
        };
        control.reaped();

        for (name, task) in [("stdout", stdout_task), ("stderr", stderr_task)] {
            match tokio::time::timeout(PIPE_DRAIN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => log::warn!("Agent {} reader failed: {}", name, err),
                Err(_) => log::warn!("Agent {} still open after exit, abandoning it", name),
            }
        }

        let got_result = result_seen.load(Ordering::SeqCst);
        let code = exit.and_then(|e| e.code);
        transcript.line("EXIT", &format!("{:?}", exit));

        let graceful = exit.is_some_and(|e| e.is_clean() || e.is_terminated_by_request());
        let mut errored = false;
        if !got_result && !graceful && !control.cancel_requested() {
            let code = exit.map(|e| e.effective_code()).unwrap_or(-1);
            let _ = events_tx.send(SessionEvent::Error(AgentError::ExitCode { code }));
            errored = true;
        }

        let state = control.finish(errored);
        log::info!("Agent exited with {:?}, session {:?}", code, state);

        if !got_result {
            let _ = events_tx.send(SessionEvent::ProcessExit { code });
        }
    });
}

async fn read_stdout(
    mut stdout: ChildStdout,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    transcript: Transcript,
    result_seen: Arc<AtomicBool>,
) {
    let mut lines = LineBuffer::new();
    let mut parser = ClaudeParser::new();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    let mut handle_line = |line: String| {
        transcript.line("STDOUT", &line);
        let Some(event) = parser.accept_line(&line) else {
            log::debug!("Ignoring agent output: {}", truncate(&line, 200));
            return;
        };
        if matches!(event, ProtocolEvent::Result { .. }) {
            result_seen.store(true, Ordering::SeqCst);
        }
        for event in SessionEvent::from_protocol(event) {
            let _ = events_tx.send(event);
        }
    };

    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in lines.push(&buf[..n]) {
                    handle_line(line);
                }
            }
            Err(err) => {
                log::warn!("Error reading agent stdout: {}", err);
                break;
            }
        }
    }

    if let Some(line) = lines.finish() {
        handle_line(line);
    }
}

async fn read_stderr(
    stderr: ChildStderr,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    transcript: Transcript,
) {
    let mut reader = BufReader::new(stderr).lines();
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                transcript.line("STDERR", &line);
                if let Some(message) = stderr_error(&line) {
                    log::warn!("Agent stderr: {}", message);
                    let _ = events_tx.send(SessionEvent::Error(AgentError::Reported(message)));
                } else if !line.trim().is_empty() {
                    log::debug!("Agent stderr: {}", line);
                }
            }
            Ok(None) => break,
            Err(err) => {
                log::debug!("Stopped reading agent stderr: {}", err);
                break;
            }
        }
    }
}

/// Error text to surface from a stderr line, if it looks like an error.
fn stderr_error(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if STDERR_ERROR.is_match(trimmed) {
        Some(trimmed.to_string())
    } else {
        None
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
