//! Agent protocol handling.
//!
//! - [`claude`]: the Claude CLI stream-json protocol
//! - [`event`]: protocol events and the events published to the UI
//! - [`tools`]: tool call classification

pub mod claude;
pub mod event;
pub mod tools;
