//! Agent process spawning and OS signal delivery.
//!
//! The agent is launched directly (no wrapping shell) with:
//! - the workspace as working directory
//! - the parent environment inherited unmodified
//! - stdout and stderr captured on separate pipes
//! - stdin closed
//!
//! Reading the pipes and supervising the exit is the job of
//! [`crate::session::ProcessSession`].

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use crate::error::AgentError;

/// Configuration for spawning an agent process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Path to the agent binary
    pub binary_path: PathBuf,
    /// Arguments to pass to the binary
    pub args: Vec<String>,
    /// Working directory for the process
    pub working_dir: Option<PathBuf>,
}

impl SpawnConfig {
    /// Create a new spawn config with required fields.
    pub fn new(binary_path: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            args,
            working_dir: None,
        }
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// A freshly spawned agent process with its output pipes.
pub struct AgentProcess {
    pub child: Child,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

impl AgentProcess {
    /// Spawn the process. Must be called from within a tokio runtime.
    pub fn spawn(config: &SpawnConfig) -> Result<Self, AgentError> {
        let mut cmd = Command::new(&config.binary_path);
        cmd.args(&config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| AgentError::Spawn(format!("{}: {}", config.binary_path.display(), e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Spawn("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::Spawn("Failed to capture stderr".to_string()))?;

        Ok(Self {
            child,
            stdout,
            stderr,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Process-control signals used for suspension and graceful cancellation.
///
/// Forced kills go through [`Child::start_kill`] instead, which cannot hit a
/// recycled pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    /// SIGSTOP
    Stop,
    /// SIGCONT
    Continue,
    /// SIGTERM
    Terminate,
}

/// Deliver a signal to `pid`. Returns false if it could not be sent.
#[cfg(unix)]
pub fn signal_process(pid: u32, signal: ProcessSignal) -> bool {
    let signo = match signal {
        ProcessSignal::Stop => libc::SIGSTOP,
        ProcessSignal::Continue => libc::SIGCONT,
        ProcessSignal::Terminate => libc::SIGTERM,
    };
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, signo) };
    if rc != 0 {
        log::warn!(
            "Failed to send {:?} to pid {}: {}",
            signal,
            pid,
            std::io::Error::last_os_error()
        );
    }
    rc == 0
}

#[cfg(not(unix))]
pub fn signal_process(_pid: u32, signal: ProcessSignal) -> bool {
    log::warn!("{:?} is not supported on this platform", signal);
    false
}

/// Exit status code that a SIGTERM-terminated process reports through a
/// shell wrapper (128 + 15).
pub const TERMINATED_EXIT_CODE: i32 = 143;

/// How a process ended, reduced to what the session needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn from_status(status: &std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }

    /// Exit code, with signal deaths reported as `128 + signal`.
    pub fn effective_code(&self) -> i32 {
        self.code
            .or_else(|| self.signal.map(|s| 128 + s))
            .unwrap_or(-1)
    }

    pub fn is_clean(&self) -> bool {
        self.code == Some(0)
    }

    /// Ended by the graceful termination request.
    pub fn is_terminated_by_request(&self) -> bool {
        #[cfg(unix)]
        if self.signal == Some(libc::SIGTERM) {
            return true;
        }
        self.code == Some(TERMINATED_EXIT_CODE)
    }
}

// ============================================================================
// TESTS
// ============================================================================
