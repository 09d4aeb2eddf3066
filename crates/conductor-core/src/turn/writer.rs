//! Serialized store writes for one turn.
//!
//! Every write to the placeholder of a turn goes through one queue and one
//! task, so a final write always lands after any earlier streaming write.
//! Session-level writes (resume token, artifacts, activity) share the queue
//! and run off the async loop like the message writes.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::persistence::{MessageContent, Store, TurnAccounting};

/// A store write against the turn's session.
pub type SessionWrite = Box<dyn FnOnce(&dyn Store) -> Result<(), StoreError> + Send>;

enum WriteOp {
    Update(MessageContent),
    Finalize(MessageContent, TurnAccounting),
    Delete,
    Session(&'static str, SessionWrite),
}

impl WriteOp {
    fn name(&self) -> &'static str {
        match self {
            WriteOp::Update(_) => "update message",
            WriteOp::Finalize(..) => "finalize message",
            WriteOp::Delete => "delete message",
            WriteOp::Session(name, _) => *name,
        }
    }
}

pub struct PlaceholderWriter {
    tx: mpsc::UnboundedSender<WriteOp>,
    task: JoinHandle<()>,
}

impl PlaceholderWriter {
    /// Start the writer task for `message_id`. Must be called within a
    /// tokio runtime.
    pub fn spawn(store: Arc<dyn Store>, message_id: String) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteOp>();
        let task = tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                let store = Arc::clone(&store);
                let id = message_id.clone();
                let name = op.name();
                let result = tokio::task::spawn_blocking(move || match op {
                    WriteOp::Update(content) => store.update_streaming_content(&id, &content),
                    WriteOp::Finalize(content, accounting) => {
                        store.finalize_message(&id, &content, accounting)
                    }
                    WriteOp::Delete => store.delete_message(&id),
                    WriteOp::Session(_, write) => write(store.as_ref()),
                })
                .await;

                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        log::warn!("Failed to {} for {}: {}", name, message_id, err)
                    }
                    Err(err) => log::warn!("Message writer for {} failed: {}", message_id, err),
                }
            }
        });
        Self { tx, task }
    }

    fn enqueue(&self, op: WriteOp) {
        if self.tx.send(op).is_err() {
            log::warn!("Message writer closed, dropping write");
        }
    }

    pub fn update(&self, content: MessageContent) {
        self.enqueue(WriteOp::Update(content));
    }

    pub fn finalize(&self, content: MessageContent, accounting: TurnAccounting) {
        self.enqueue(WriteOp::Finalize(content, accounting));
    }

    pub fn delete(&self) {
        self.enqueue(WriteOp::Delete);
    }

    /// Queue a session write behind the message writes already queued.
    pub fn session(&self, name: &'static str, write: SessionWrite) {
        self.enqueue(WriteOp::Session(name, write));
    }

    /// Write `content` as final, or delete the placeholder if it is empty.
    pub fn finalize_or_delete(&self, content: MessageContent, accounting: TurnAccounting) {
        if content.is_empty() {
            self.delete();
        } else {
            self.finalize(content, accounting);
        }
    }

    /// Wait until every queued write has landed.
    pub async fn close(self) {
        drop(self.tx);
        if let Err(err) = self.task.await {
            log::warn!("Message writer task failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryStore, MessageStore, Role, SessionStore};
    use std::path::Path;

    fn setup() -> (Arc<MemoryStore>, String) {
        let store = Arc::new(MemoryStore::new());
        store.create_session("s1", Path::new("/tmp")).unwrap();
        let placeholder = store.create_message("s1", Role::Assistant, "", 0).unwrap();
        (store, placeholder.id)
    }

    fn text(s: &str) -> MessageContent {
        MessageContent {
            text: s.to_string(),
            ..MessageContent::default()
        }
    }

    #[tokio::test]
    async fn writes_apply_in_order() {
        let (store, id) = setup();
        let writer = PlaceholderWriter::spawn(store.clone(), id);
        for i in 1..=20 {
            writer.update(text(&"a".repeat(i)));
        }
        writer.finalize(
            text("final"),
            TurnAccounting {
                tokens: Some(3),
                cost_usd: None,
            },
        );
        writer.close().await;

        let message = &store.messages("s1").unwrap()[0];
        assert_eq!(message.content, "final");
        assert!(!message.is_streaming);
    }

    #[tokio::test]
    async fn empty_content_deletes() {
        let (store, id) = setup();
        let writer = PlaceholderWriter::spawn(store.clone(), id);
        writer.finalize_or_delete(MessageContent::default(), TurnAccounting::default());
        writer.close().await;

        assert!(store.messages("s1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn session_writes_share_the_queue() {
        let (store, id) = setup();
        let writer = PlaceholderWriter::spawn(store.clone(), id);
        writer.update(text("partial"));
        writer.session(
            "check order",
            Box::new(|store: &dyn Store| {
                // The earlier update has landed.
                assert_eq!(store.messages("s1")?[0].content, "partial");
                store.set_resume_token("s1", "tok")
            }),
        );
        writer.close().await;

        let session = store.session("s1").unwrap().unwrap();
        assert_eq!(session.resume_token.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn store_errors_are_not_fatal() {
        let (store, id) = setup();
        let writer = PlaceholderWriter::spawn(store.clone(), "missing".to_string());
        writer.update(text("lost"));
        writer.close().await;

        let writer = PlaceholderWriter::spawn(store.clone(), id);
        writer.update(text("kept"));
        writer.close().await;
        assert_eq!(store.messages("s1").unwrap()[0].content, "kept");
    }
}
