//! Types and ports for the relay-based pub/sub messaging substrate.
//!
//! The engine treats the substrate as an external collaborator: this module
//! defines the wire shapes ([`event`]) and the two narrow traits the engine
//! depends on to receive ([`ingest::EventSource`]) and send
//! ([`outbox::OutboxPort`]) events, without knowing how signing, relay
//! connections, or reconnection work underneath.

pub mod event;
pub mod ingest;
pub mod outbox;

pub use event::{
    ContentParseError, EventId, KIND_BALANCE_ANNOUNCEMENT, KIND_TRANSACTION, PublicKey,
    RequestContent, SignedEvent, TAG_INBOUND_START, TAG_INTERNAL_START, TAG_OUTBOUND_START, Tag,
};
pub use ingest::{ChannelEventSource, EventSource};
pub use outbox::{OutboxPort, OutgoingEvent, RecordingOutbox};
