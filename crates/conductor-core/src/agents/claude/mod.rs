//! Claude protocol parser and spawn configuration.
//!
//! Parses Claude's stream-json output format into [`ProtocolEvent`]s.
//!
//! [`ProtocolEvent`]: crate::agents::event::ProtocolEvent

mod parser;
pub mod spawn;
mod types;

pub use parser::{parse_line, ClaudeParser, LineBuffer};
pub use spawn::ClaudeConfig;
pub use types::*;
