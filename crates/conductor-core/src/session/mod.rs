//! Agent process sessions.
//!
//! A [`ProcessSession`] is one invocation of the agent: it spawns the
//! process, turns its output into [`SessionEvent`]s, and exposes a
//! [`SessionControl`] for suspend, resume and cancel.

mod process;
mod state;

pub use process::{
    ProcessSession, ResultSummary, SendRequest, SessionControl, SessionEvent, SessionHandler,
    KILL_GRACE_PERIOD,
};
pub use state::{SessionMachine, SessionState};
