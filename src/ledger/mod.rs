//! The transaction-processing engine: C4 through C8 of the design.
//!
//! [`validate`] is the shared pre-validation pipeline (C4), [`handlers`]
//! composes it with the store's mutation primitives into the three request
//! variants (C6), [`publish`] builds outcome/balance events and the deferred
//! re-announcement task, [`retry`] classifies failures and re-enters the
//! pipeline on transient faults (C7), and [`engine`] wires all of it to an
//! event source and an introspection HTTP surface (C8).

pub mod engine;
pub mod handlers;
pub mod publish;
pub mod retry;
pub mod validate;

pub use engine::{Counters, Engine};
pub use retry::{ProcessResult, process_with_retry};
