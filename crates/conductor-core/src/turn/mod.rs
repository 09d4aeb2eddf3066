//! Conversational turns.
//!
//! A turn is one user message and the agent's complete response. The
//! [`TurnOrchestrator`] runs turns against a store, a settings provider and
//! an event sink.

mod orchestrator;
mod state;
pub mod title;
mod writer;

pub use orchestrator::{TurnCompletion, TurnOrchestrator, TurnOutcome};
pub use state::{AccumulatedTurnState, Debouncer, PERSIST_DEBOUNCE};
