//! # conductor-core
//!
//! Turn orchestration for a coding-agent chat host.
//!
//! This crate is framework-agnostic and can be used by any front end that
//! can supply a message store, a settings provider and an event sink.
//!
//! ## Key Concepts
//!
//! - **Parser**: turns the agent's stream-json stdout into typed events
//! - **Process Session**: one agent invocation with suspend, resume and cancel
//! - **Turn**: a user message and the agent's complete response
//! - **TurnEvent**: what the orchestrator publishes for a UI to render

pub mod agents;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod logging;
pub mod paths;
pub mod persistence;
pub mod session;
pub mod spawn;
pub mod turn;

// Re-export commonly used types
pub use agents::event::{DoneReason, ProtocolEvent, ToolCall, TurnEvent};
pub use agents::tools::{classify, ToolClassification, ToolOperation};
pub use config::{PermissionMode, Settings, SettingsProvider};
pub use error::{AgentError, StoreError, TurnError};
pub use event_bus::{EventBus, EventSink};
pub use persistence::{FileStore, MemoryStore, MessageStore, SessionStore, Store};
pub use session::{ProcessSession, SessionControl, SessionState};
pub use turn::{TurnCompletion, TurnOrchestrator, TurnOutcome};
