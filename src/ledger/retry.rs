//! C7 — Retry Controller.
//!
//! Classifies [`LedgerError`] on the commit path: deterministic rejections
//! are terminal and already fully handled (error outcome published, Event
//! persisted) by the time they reach here; transient faults re-enter the
//! pipeline from the top, up to `MAX_RETRIES`. Because the Event row is
//! only persisted on a terminal outcome, an intermediate retry never
//! spuriously trips the idempotency check in C4.

use std::sync::atomic::Ordering;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::LedgerError;
use crate::ledger::engine::Counters;
use crate::ledger::handlers::{HandleOutcome, handle_once};
use crate::ledger::publish;
use crate::ledger::validate::resolve_author;
use crate::store::{EventRecord, LedgerStore, TransactionVariant};
use crate::substrate::{OutboxPort, PublicKey, SignedEvent, Tag};

/// Final, observable result of processing one delivered event, after any
/// retries have run their course.
pub enum ProcessResult {
    Duplicate,
    Rejected,
    Committed(HandleOutcome),
    /// Exhausted `MAX_RETRIES` on transient faults; a `network-error`
    /// outcome event has been published and the Event persisted.
    Failed,
}

pub async fn process_with_retry(
    event: &SignedEvent,
    store: &dyn LedgerStore,
    outbox: &dyn OutboxPort,
    config: &Config,
    counters: &Counters,
) -> ProcessResult {
    let mut attempt: u32 = 0;
    loop {
        match handle_once(event, store, outbox, config).await {
            Ok(HandleOutcome::Duplicate) => return ProcessResult::Duplicate,
            Ok(HandleOutcome::Rejected) => return ProcessResult::Rejected,
            Ok(outcome @ HandleOutcome::Committed { .. }) => {
                info!(event_id = %event.id, attempt, "request committed");
                return ProcessResult::Committed(outcome);
            }
            Err(err) if err.is_transient() => {
                attempt += 1;
                counters.retried.fetch_add(1, Ordering::Relaxed);
                warn!(event_id = %event.id, attempt, error = %err, "transient fault, retrying");
                if attempt >= config.max_retries {
                    publish_network_error(event, store, outbox).await;
                    return ProcessResult::Failed;
                }
            }
            Err(err) => {
                // Deterministic LedgerError surfacing here (rather than as
                // HandleOutcome::Rejected) means persistence or publication
                // itself failed for an otherwise-rejected request; treat as
                // a terminal failure without retrying validation again.
                warn!(event_id = %event.id, error = %err, "non-retriable error outside handler body");
                return ProcessResult::Failed;
            }
        }
    }
}

/// Terminal step on retry exhaustion: persists the Event so the request is
/// never replayed, then publishes the `network-error` outcome (§4.4, §7).
async fn publish_network_error(event: &SignedEvent, store: &dyn LedgerStore, outbox: &dyn OutboxPort) {
    use serde_json::Value;

    let author = resolve_author(event).unwrap_or_else(|| event.signer.clone());
    let payload = event.parse_content().map(|c| c.raw).unwrap_or(Value::Null);
    let record = EventRecord {
        id: event.id.clone(),
        signature: event.signature.clone(),
        signer: event.signer.clone(),
        author: author.clone(),
        kind: event.kind,
        payload,
    };
    let _ = store.insert_standalone_event(&record).await;

    let recipients = Tag::p_values(&event.tags);
    if let Some(receiver) = recipients.get(1).map(|s| PublicKey(s.to_string())) {
        let variant = event
            .transaction_type_tag()
            .and_then(TransactionVariant::from_start_tag)
            .map(|v| v.descriptor())
            .unwrap_or("unknown-transaction");
        let error_event = publish::error_outcome_event(variant, &author, &receiver, &event.id, "Network Error");
        let _ = outbox.publish(error_event).await;
    }
}
