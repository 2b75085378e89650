//! C2 — Outbox Port: the engine's one-way sink for outgoing events.
//!
//! Publication is best-effort and fire-and-forget from the engine's point of
//! view: a publish failure is a transient fault like any other (see
//! [`crate::error::LedgerError`]), not a reason to abort a committed
//! transaction. Signing, relay fan-out, and reconnection live behind this
//! trait; the engine only ever constructs [`OutgoingEvent`] values.

use async_trait::async_trait;

use crate::error::LedgerError;
use crate::substrate::event::Tag;

/// An event the engine wants published. Unsigned: the outbox implementation
/// owns this ledger's keypair and signs on the way out.
#[derive(Debug, Clone)]
pub struct OutgoingEvent {
    pub kind: i32,
    pub tags: Vec<Tag>,
    pub content: String,
}

impl OutgoingEvent {
    pub fn new(kind: i32, tags: Vec<Tag>, content: impl Into<String>) -> Self {
        OutgoingEvent {
            kind,
            tags,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait OutboxPort: Send + Sync {
    async fn publish(&self, event: OutgoingEvent) -> Result<(), LedgerError>;
}

/// In-memory recorder used by tests and by the in-process introspection
/// surface's counters; never talks to a real relay.
pub struct RecordingOutbox {
    sent: tokio::sync::Mutex<Vec<OutgoingEvent>>,
}

impl RecordingOutbox {
    pub fn new() -> Self {
        RecordingOutbox {
            sent: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn sent(&self) -> Vec<OutgoingEvent> {
        self.sent.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.sent.lock().await.len()
    }
}

impl Default for RecordingOutbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboxPort for RecordingOutbox {
    async fn publish(&self, event: OutgoingEvent) -> Result<(), LedgerError> {
        self.sent.lock().await.push(event);
        Ok(())
    }
}
