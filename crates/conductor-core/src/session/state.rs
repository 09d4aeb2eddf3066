//! Process session lifecycle.
//!
//! [`SessionMachine`] is the pure part of a session: it tracks the lifecycle
//! state and, for each control request, decides which signals to deliver.
//! Signal delivery itself lives in [`super::process::SessionControl`].

use serde::{Deserialize, Serialize};

use crate::spawn::ProcessSignal;

/// Lifecycle state of one agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    NotStarted,
    Running,
    Suspended,
    Completed,
    Errored,
    Cancelled,
}

impl SessionState {
    /// A process exists and has not yet exited.
    pub fn is_live(self) -> bool {
        matches!(self, SessionState::Running | SessionState::Suspended)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Errored | SessionState::Cancelled
        )
    }
}

/// Transition planner for a session.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    cancel_requested: bool,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::NotStarted,
            cancel_requested: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    /// The process was spawned.
    ///
    /// Returns the signals owed to the new process: a cancel that arrived
    /// before the spawn is delivered now.
    pub fn start(&mut self) -> Vec<ProcessSignal> {
        if self.state != SessionState::NotStarted {
            return Vec::new();
        }
        self.state = SessionState::Running;
        if self.cancel_requested {
            vec![ProcessSignal::Terminate]
        } else {
            Vec::new()
        }
    }

    /// The process could not be started.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Errored;
        }
    }

    pub fn suspend(&mut self) -> Option<ProcessSignal> {
        if self.state == SessionState::Running && !self.cancel_requested {
            self.state = SessionState::Suspended;
            Some(ProcessSignal::Stop)
        } else {
            None
        }
    }

    pub fn resume(&mut self) -> Option<ProcessSignal> {
        if self.state == SessionState::Suspended && !self.cancel_requested {
            self.state = SessionState::Running;
            Some(ProcessSignal::Continue)
        } else {
            None
        }
    }

    /// Request cancellation.
    ///
    /// A suspended process is continued first so it can observe the
    /// termination request. Repeated cancels send nothing.
    pub fn cancel(&mut self) -> Vec<ProcessSignal> {
        if self.cancel_requested || self.state.is_terminal() {
            return Vec::new();
        }
        self.cancel_requested = true;
        match self.state {
            SessionState::Suspended => {
                self.state = SessionState::Running;
                vec![ProcessSignal::Continue, ProcessSignal::Terminate]
            }
            SessionState::Running => vec![ProcessSignal::Terminate],
            _ => Vec::new(),
        }
    }

    /// The process exited. Returns the terminal state.
    pub fn finish(&mut self, errored: bool) -> SessionState {
        if !self.state.is_terminal() {
            self.state = if self.cancel_requested {
                SessionState::Cancelled
            } else if errored {
                SessionState::Errored
            } else {
                SessionState::Completed
            };
        }
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> SessionMachine {
        let mut machine = SessionMachine::new();
        assert!(machine.start().is_empty());
        machine
    }

    #[test]
    fn starts_not_started() {
        let machine = SessionMachine::new();
        assert_eq!(machine.state(), SessionState::NotStarted);
        assert!(!machine.state().is_live());
    }

    mod suspend_resume {
        use super::*;

        #[test]
        fn suspend_sends_stop() {
            let mut machine = running();
            assert_eq!(machine.suspend(), Some(ProcessSignal::Stop));
            assert_eq!(machine.state(), SessionState::Suspended);
        }

        #[test]
        fn suspend_twice_is_noop() {
            let mut machine = running();
            machine.suspend();
            assert_eq!(machine.suspend(), None);
        }

        #[test]
        fn resume_sends_continue() {
            let mut machine = running();
            machine.suspend();
            assert_eq!(machine.resume(), Some(ProcessSignal::Continue));
            assert_eq!(machine.state(), SessionState::Running);
        }

        #[test]
        fn resume_when_running_is_noop() {
            let mut machine = running();
            assert_eq!(machine.resume(), None);
        }

        #[test]
        fn suspend_before_start_is_noop() {
            let mut machine = SessionMachine::new();
            assert_eq!(machine.suspend(), None);
            assert_eq!(machine.state(), SessionState::NotStarted);
        }
    }

    mod cancel {
        use super::*;

        #[test]
        fn running_gets_terminate() {
            let mut machine = running();
            assert_eq!(machine.cancel(), vec![ProcessSignal::Terminate]);
            assert!(machine.cancel_requested());
        }

        #[test]
        fn suspended_gets_continue_then_terminate() {
            let mut machine = running();
            machine.suspend();
            assert_eq!(
                machine.cancel(),
                vec![ProcessSignal::Continue, ProcessSignal::Terminate]
            );
        }

        #[test]
        fn second_cancel_sends_nothing() {
            let mut machine = running();
            machine.cancel();
            assert!(machine.cancel().is_empty());
        }

        #[test]
        fn cancel_before_start_terminates_on_start() {
            let mut machine = SessionMachine::new();
            assert!(machine.cancel().is_empty());
            assert_eq!(machine.start(), vec![ProcessSignal::Terminate]);
        }

        #[test]
        fn no_suspend_after_cancel() {
            let mut machine = running();
            machine.cancel();
            assert_eq!(machine.suspend(), None);
        }
    }

    mod finish {
        use super::*;

        #[test]
        fn clean_exit_completes() {
            let mut machine = running();
            assert_eq!(machine.finish(false), SessionState::Completed);
        }

        #[test]
        fn error_exit_errors() {
            let mut machine = running();
            assert_eq!(machine.finish(true), SessionState::Errored);
        }

        #[test]
        fn cancel_wins_over_error() {
            let mut machine = running();
            machine.cancel();
            assert_eq!(machine.finish(true), SessionState::Cancelled);
        }

        #[test]
        fn terminal_state_is_sticky() {
            let mut machine = running();
            machine.finish(false);
            assert!(machine.cancel().is_empty());
            assert_eq!(machine.finish(true), SessionState::Completed);
        }

        #[test]
        fn failed_spawn_is_errored() {
            let mut machine = SessionMachine::new();
            machine.fail();
            assert_eq!(machine.state(), SessionState::Errored);
            assert!(machine.start().is_empty());
        }
    }
}
