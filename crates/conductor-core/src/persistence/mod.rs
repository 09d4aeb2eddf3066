//! Persistence layer for sessions, messages, and artifacts.
//!
//! # Overview
//!
//! The orchestrator talks to storage only through the [`MessageStore`] and
//! [`SessionStore`] traits. Two backends are provided:
//!
//! - [`MemoryStore`] - everything in process memory
//! - [`FileStore`] - one JSON document per session under a data directory
//!
//! # Atomic Writes
//!
//! [`FileStore`] saves use write-then-rename to prevent corruption:
//!
//! 1. Write to `{id}.json.tmp`
//! 2. Rename to `{id}.json` (atomic on Unix)

mod file;
mod memory;
mod store;
pub mod types;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::{MessageStore, SessionStore, Store};
pub use types::*;
