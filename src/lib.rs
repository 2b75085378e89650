//! custodial-ledger — an event-driven custodial token ledger for a
//! relay-based pub/sub messaging network.
//!
//! External actors request operations by publishing signed events bearing a
//! transaction-type tag; this crate turns each request into an atomic
//! mutation of a multi-account / multi-token balance store and publishes
//! outcome and balance-announcement events back to the network.
//!
//! # Modules
//!
//! - [`amount`] — arbitrary-precision token amounts.
//! - [`config`] — environment-driven process configuration (C0).
//! - [`error`] — the `LedgerError` / `RejectionReason` hierarchy.
//! - [`logging`] — structured logging bootstrap (C0).
//! - [`substrate`] — wire types and ports for the messaging substrate (C2, C3).
//! - [`store`] — the ledger's durable entities, behind the `LedgerStore` trait (C1).
//! - [`ledger`] — the transaction-processing engine itself (C4-C8).

pub mod amount;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod store;
pub mod substrate;

pub use amount::Amount;
pub use config::Config;
pub use error::{LedgerError, RejectionReason};
pub use ledger::{Counters, Engine, ProcessResult, process_with_retry};
pub use store::{LedgerStore, LedgerTxn};
pub use substrate::{EventSource, OutboxPort, SignedEvent};
