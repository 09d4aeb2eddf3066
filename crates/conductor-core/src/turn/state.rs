//! Per-turn accumulators.

use std::time::Duration;

use tokio::time::Instant;

use crate::agents::event::ToolCall;
use crate::persistence::MessageContent;

/// Minimum spacing between incremental writes of a streaming message.
pub const PERSIST_DEBOUNCE: Duration = Duration::from_secs(2);

/// Lets an action through at most once per interval.
#[derive(Debug, Clone)]
pub struct Debouncer {
    interval: Duration,
    last: Instant,
}

impl Debouncer {
    /// The interval starts counting at `start`.
    pub fn new(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            last: start,
        }
    }

    /// True if `interval` has passed since the last accepted action. An
    /// accepted action restarts the interval.
    pub fn ready(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last) >= self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }

    /// Record an action that bypassed the debounce.
    pub fn mark(&mut self, now: Instant) {
        self.last = now;
    }
}

/// Everything the active turn has received so far.
///
/// Owned by the turn loop; all three accumulators are append-only.
#[derive(Debug)]
pub struct AccumulatedTurnState {
    pub placeholder_id: String,
    content: MessageContent,
    debounce: Debouncer,
}

impl AccumulatedTurnState {
    pub fn new(placeholder_id: String, start: Instant) -> Self {
        Self {
            placeholder_id,
            content: MessageContent::default(),
            debounce: Debouncer::new(PERSIST_DEBOUNCE, start),
        }
    }

    pub fn push_text(&mut self, text: &str) {
        self.content.text.push_str(text);
    }

    pub fn push_thinking(&mut self, text: &str) {
        self.content.thinking.push_str(text);
    }

    pub fn push_tool_call(&mut self, call: ToolCall) {
        self.content.tool_calls.push(call);
    }

    pub fn text(&self) -> &str {
        &self.content.text
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.content.tool_calls
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn snapshot(&self) -> MessageContent {
        self.content.clone()
    }

    /// Whether a debounced write is due.
    pub fn persist_due(&mut self, now: Instant) -> bool {
        self.debounce.ready(now)
    }

    /// Note an immediate write.
    pub fn persisted(&mut self, now: Instant) {
        self.debounce.mark(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod debouncer {
        use super::*;

        #[test]
        fn blocks_within_interval() {
            let start = Instant::now();
            let mut debouncer = Debouncer::new(Duration::from_secs(2), start);
            assert!(!debouncer.ready(start));
            assert!(!debouncer.ready(start + Duration::from_millis(1999)));
            assert!(debouncer.ready(start + Duration::from_secs(2)));
        }

        #[test]
        fn accepted_action_restarts_interval() {
            let start = Instant::now();
            let mut debouncer = Debouncer::new(Duration::from_secs(2), start);
            assert!(debouncer.ready(start + Duration::from_secs(3)));
            assert!(!debouncer.ready(start + Duration::from_secs(4)));
            assert!(debouncer.ready(start + Duration::from_secs(5)));
        }

        #[test]
        fn mark_restarts_interval() {
            let start = Instant::now();
            let mut debouncer = Debouncer::new(Duration::from_secs(2), start);
            debouncer.mark(start + Duration::from_secs(10));
            assert!(!debouncer.ready(start + Duration::from_secs(11)));
        }
    }

    mod accumulated {
        use super::*;

        #[test]
        fn accumulates_in_order() {
            let mut state = AccumulatedTurnState::new("m1".to_string(), Instant::now());
            state.push_text("Hel");
            state.push_text("lo");
            state.push_thinking("plan");
            state.push_tool_call(ToolCall {
                id: "t1".to_string(),
                name: "Read".to_string(),
                input: json!({}),
            });

            let snapshot = state.snapshot();
            assert_eq!(snapshot.text, "Hello");
            assert_eq!(snapshot.thinking, "plan");
            assert_eq!(state.tool_calls().len(), 1);
            assert!(!state.is_empty());
        }

        #[test]
        fn thinking_only_counts_as_empty() {
            let mut state = AccumulatedTurnState::new("m1".to_string(), Instant::now());
            state.push_thinking("hmm");
            assert!(state.is_empty());
        }

        #[test]
        fn debounced_writes_are_fewer_than_deltas() {
            let start = Instant::now();
            let mut state = AccumulatedTurnState::new("m1".to_string(), start);
            let mut writes = Vec::new();

            // 100 deltas, 50ms apart: 5 seconds of streaming.
            for i in 0..100u64 {
                state.push_text("x");
                let now = start + Duration::from_millis(50 * (i + 1));
                if state.persist_due(now) {
                    writes.push(state.snapshot().text);
                }
            }
            // Final write at completion.
            writes.push(state.snapshot().text);

            assert!(writes.len() < 100);
            assert_eq!(writes.len(), 3);
            assert_eq!(writes.last().map(String::len), Some(100));
        }
    }
}
