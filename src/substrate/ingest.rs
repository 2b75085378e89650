//! C3 — Event Ingest Adapter: subscribes to the substrate and hands raw
//! signed events to the engine. Owns delivery (acking, reconnection,
//! relay-side filtering); the engine only ever calls [`EventSource::recv`].

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::substrate::event::SignedEvent;

/// Subscription filter for the three transaction-start variants, applied at
/// the relay per §6: kind 1112, recipient tag matching this ledger's
/// identity, one of the three `t` start tags, and a freshness bound.
pub const SUBSCRIPTION_FRESHNESS_SECS: i64 = 86_000;

#[async_trait]
pub trait EventSource: Send + Sync {
    /// Returns the next delivered event, or `None` once the source has shut
    /// down and will not deliver again.
    async fn recv(&self) -> Option<SignedEvent>;
}

/// Channel-backed adapter. A relay client task (not modelled here) owns the
/// actual substrate connection and pushes validated, filtered events into
/// the sender half; the engine only ever sees the receiver half through
/// this trait.
pub struct ChannelEventSource {
    receiver: Mutex<mpsc::Receiver<SignedEvent>>,
}

impl ChannelEventSource {
    pub fn new(receiver: mpsc::Receiver<SignedEvent>) -> Self {
        ChannelEventSource {
            receiver: Mutex::new(receiver),
        }
    }

    /// Convenience constructor pairing the source with the sender the relay
    /// client task will push into.
    pub fn channel(buffer: usize) -> (mpsc::Sender<SignedEvent>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, ChannelEventSource::new(rx))
    }
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn recv(&self) -> Option<SignedEvent> {
        self.receiver.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::event::{EventId, KIND_TRANSACTION, PublicKey, Tag};

    fn sample() -> SignedEvent {
        SignedEvent {
            id: EventId("e1".into()),
            signature: "sig".into(),
            signer: PublicKey("pk".into()),
            kind: KIND_TRANSACTION,
            created_at: 0,
            tags: vec![Tag::t("internal-transaction-start")],
            content: "{}".into(),
        }
    }

    #[tokio::test]
    async fn delivers_events_in_fifo_order() {
        let (tx, source) = ChannelEventSource::channel(8);
        tx.send(sample()).await.unwrap();
        let received = source.recv().await.unwrap();
        assert_eq!(received.id, EventId("e1".into()));
    }

    #[tokio::test]
    async fn returns_none_once_sender_dropped() {
        let (tx, source) = ChannelEventSource::channel(8);
        drop(tx);
        assert!(source.recv().await.is_none());
    }
}
