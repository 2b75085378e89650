//! C6 — Transaction Handlers: the three request variants, each composed
//! from C4 (validate) + the store's C5 mutation primitives.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::config::Config;
use crate::error::{LedgerError, RejectionReason};
use crate::ledger::publish::{self, AffectedBalance};
use crate::ledger::validate::{Validated, validate};
use crate::store::{BalanceRecord, EventRecord, LedgerStore, LedgerTxn, TokenId, TransactionVariant};
use crate::substrate::{EventId, OutboxPort, PublicKey, SignedEvent, Tag};

/// Result of one attempt at processing a single event.
pub enum HandleOutcome {
    Duplicate,
    Rejected,
    Committed {
        affected: Vec<AffectedBalance>,
        triggering_event: EventId,
    },
}

/// Runs the pipeline once: validate, and on success, open a store
/// transaction, apply the variant's mutation, commit, and publish. Returns
/// `Err(LedgerError::Transient(_))` for faults the retry controller should
/// re-attempt from the top.
pub async fn handle_once(
    event: &SignedEvent,
    store: &dyn LedgerStore,
    outbox: &dyn OutboxPort,
    config: &Config,
) -> Result<HandleOutcome, LedgerError> {
    match validate(event, store).await? {
        Validated::Duplicate => Ok(HandleOutcome::Duplicate),
        Validated::Rejected {
            reason,
            author,
            sender,
            receiver,
        } => {
            persist_rejected_event(event, &author, store).await?;
            publish_rejection(event, &sender, receiver.as_ref(), &reason, outbox).await;
            Ok(HandleOutcome::Rejected)
        }
        Validated::Ready(request) => {
            let variant = request.variant;
            let result = match variant {
                TransactionVariant::Internal => apply_internal(&request, store).await,
                TransactionVariant::Inbound => apply_inbound(&request, store, config).await,
                TransactionVariant::Outbound => apply_outbound(&request, store, config).await,
            };

            match result {
                Ok(ApplyResult::Applied(affected)) => {
                    let content = event.parse_content().expect("re-validated above");
                    let ok_event = publish::ok_outcome_event(
                        variant.descriptor(),
                        &request.sender,
                        &request.receiver,
                        &event.id,
                        &carried_e_tags(event),
                        &content,
                    );
                    let _ = outbox.publish(ok_event).await;
                    for balance in &affected {
                        let announcement = publish::balance_announcement_event(
                            &balance.account,
                            &balance.token_name,
                            &balance.amount,
                            &event.id,
                        );
                        let _ = outbox.publish(announcement).await;
                    }
                    Ok(HandleOutcome::Committed {
                        affected,
                        triggering_event: event.id.clone(),
                    })
                }
                Ok(ApplyResult::Unauthorized(reason)) => {
                    persist_rejected_event(event, &request.author, store).await?;
                    publish_rejection(event, &request.sender, Some(&request.receiver), &reason, outbox).await;
                    Ok(HandleOutcome::Rejected)
                }
                Err(LedgerError::Rejection(reason)) => {
                    persist_rejected_event(event, &request.author, store).await?;
                    publish_rejection(event, &request.sender, Some(&request.receiver), &reason, outbox).await;
                    Ok(HandleOutcome::Rejected)
                }
                Err(transient) => Err(transient),
            }
        }
    }
}

enum ApplyResult {
    Applied(Vec<AffectedBalance>),
    /// Mint/burn authorisation failed: short-circuits before any Balance
    /// mutation is attempted (resolves the reference implementation's
    /// known defect, §9.1).
    Unauthorized(RejectionReason),
}

async fn apply_internal(
    request: &crate::ledger::validate::TxRequest,
    store: &dyn LedgerStore,
) -> Result<ApplyResult, LedgerError> {
    let token_ids: Vec<TokenId> = request.tokens.keys().copied().collect();

    let sender_balances = store.load_balances(&request.sender, &token_ids).await?;
    let sufficient: BTreeMap<TokenId, BalanceRecord> = sender_balances
        .into_iter()
        .filter(|b| b.amount >= *request.tokens.get(&b.token_id).expect("queried by these ids"))
        .map(|b| (b.token_id, b))
        .collect();

    if sufficient.len() < token_ids.len() {
        return Err(LedgerError::rejection(RejectionReason::InsufficientFunds));
    }

    let receiver_existing = store.load_balances(&request.receiver, &token_ids).await?;
    let receiver_has: std::collections::BTreeSet<TokenId> =
        receiver_existing.iter().map(|b| b.token_id).collect();

    let mut txn = store.begin().await?;
    let event_record = event_record_for(&request.event, &request.author, request.memo_payload());
    let tx_id = txn
        .insert_transaction(request.transaction_type_id, &event_record, event_record.payload.clone())
        .await?;

    let mut affected = Vec::new();

    // Re-load inside the transaction for a consistent, locked view.
    let sender_locked = txn.load_balances_for_update(&request.sender, &token_ids).await?;
    for balance in &sender_locked {
        let delta = request.tokens.get(&balance.token_id).expect("validated token");
        let updated = txn.debit(balance, delta, tx_id, &request.event.id).await?;
        affected.push(AffectedBalance {
            account: request.sender.clone(),
            token_id: updated.token_id,
            token_name: String::new(),
            amount: updated.amount,
        });
    }

    let receiver_locked = txn.load_balances_for_update(&request.receiver, &token_ids).await?;
    for balance in &receiver_locked {
        let delta = request.tokens.get(&balance.token_id).expect("validated token");
        let updated = txn.credit(balance, delta, tx_id, &request.event.id).await?;
        affected.push(AffectedBalance {
            account: request.receiver.clone(),
            token_id: updated.token_id,
            token_name: String::new(),
            amount: updated.amount,
        });
    }

    for token_id in &token_ids {
        if !receiver_has.contains(token_id) {
            let delta = request.tokens.get(token_id).expect("validated token");
            let created = txn
                .create_fresh(&request.receiver, *token_id, delta, tx_id, &request.event.id)
                .await?;
            affected.push(AffectedBalance {
                account: request.receiver.clone(),
                token_id: created.token_id,
                token_name: String::new(),
                amount: created.amount,
            });
        }
    }

    txn.commit().await?;
    Ok(ApplyResult::Applied(fill_token_names(request, affected)))
}

async fn apply_inbound(
    request: &crate::ledger::validate::TxRequest,
    store: &dyn LedgerStore,
    config: &Config,
) -> Result<ApplyResult, LedgerError> {
    if request.author != config.minter_public_key {
        return Ok(ApplyResult::Unauthorized(RejectionReason::UnauthorizedMint));
    }

    let token_ids: Vec<TokenId> = request.tokens.keys().copied().collect();
    let receiver_existing = store.load_balances(&request.receiver, &token_ids).await?;
    let receiver_has: std::collections::BTreeSet<TokenId> =
        receiver_existing.iter().map(|b| b.token_id).collect();

    let mut txn = store.begin().await?;
    let event_record = event_record_for(&request.event, &request.author, request.memo_payload());
    let tx_id = txn
        .insert_transaction(request.transaction_type_id, &event_record, event_record.payload.clone())
        .await?;

    let mut affected = Vec::new();
    let locked = txn.load_balances_for_update(&request.receiver, &token_ids).await?;
    for balance in &locked {
        let delta = request.tokens.get(&balance.token_id).expect("validated token");
        let updated = txn.credit(balance, delta, tx_id, &request.event.id).await?;
        affected.push(AffectedBalance {
            account: request.receiver.clone(),
            token_id: updated.token_id,
            token_name: String::new(),
            amount: updated.amount,
        });
    }
    for token_id in &token_ids {
        if !receiver_has.contains(token_id) {
            let delta = request.tokens.get(token_id).expect("validated token");
            let created = txn
                .create_fresh(&request.receiver, *token_id, delta, tx_id, &request.event.id)
                .await?;
            affected.push(AffectedBalance {
                account: request.receiver.clone(),
                token_id: created.token_id,
                token_name: String::new(),
                amount: created.amount,
            });
        }
    }

    txn.commit().await?;
    Ok(ApplyResult::Applied(fill_token_names(request, affected)))
}

async fn apply_outbound(
    request: &crate::ledger::validate::TxRequest,
    store: &dyn LedgerStore,
    config: &Config,
) -> Result<ApplyResult, LedgerError> {
    if request.author != config.minter_public_key {
        return Ok(ApplyResult::Unauthorized(RejectionReason::UnauthorizedBurn));
    }

    let token_ids: Vec<TokenId> = request.tokens.keys().copied().collect();
    let sender_balances = store.load_balances(&request.sender, &token_ids).await?;
    let sufficient_count = sender_balances
        .iter()
        .filter(|b| b.amount >= *request.tokens.get(&b.token_id).expect("queried by these ids"))
        .count();
    if sufficient_count < token_ids.len() {
        return Err(LedgerError::rejection(RejectionReason::InsufficientFunds));
    }

    let mut txn = store.begin().await?;
    let event_record = event_record_for(&request.event, &request.author, request.memo_payload());
    let tx_id = txn
        .insert_transaction(request.transaction_type_id, &event_record, event_record.payload.clone())
        .await?;

    let mut affected = Vec::new();
    let locked = txn.load_balances_for_update(&request.sender, &token_ids).await?;
    for balance in &locked {
        let delta = request.tokens.get(&balance.token_id).expect("validated token");
        let updated = txn.debit(balance, delta, tx_id, &request.event.id).await?;
        affected.push(AffectedBalance {
            account: request.sender.clone(),
            token_id: updated.token_id,
            token_name: String::new(),
            amount: updated.amount,
        });
    }

    txn.commit().await?;
    Ok(ApplyResult::Applied(fill_token_names(request, affected)))
}

fn fill_token_names(
    request: &crate::ledger::validate::TxRequest,
    mut affected: Vec<AffectedBalance>,
) -> Vec<AffectedBalance> {
    // `tokens` is keyed by store id, not name; request content only ever
    // carries names, so reverse-resolve here for the announcement events.
    for a in &mut affected {
        if let Some(name) = request.token_name(a.token_id) {
            a.token_name = name.to_string();
        }
    }
    affected
}

fn carried_e_tags(event: &SignedEvent) -> Vec<Tag> {
    // In this substrate convention, incoming `e` tags on a request are
    // thread/reply references the outcome event should carry forward.
    event.tags.iter().filter(|t| t.kind() == "e").cloned().collect()
}

fn event_record_for(event: &SignedEvent, author: &PublicKey, payload: &Value) -> EventRecord {
    EventRecord {
        id: event.id.clone(),
        signature: event.signature.clone(),
        signer: event.signer.clone(),
        author: author.clone(),
        kind: event.kind,
        payload: payload.clone(),
    }
}

async fn persist_rejected_event(
    event: &SignedEvent,
    author: &PublicKey,
    store: &dyn LedgerStore,
) -> Result<(), LedgerError> {
    let payload = event
        .parse_content()
        .map(|c| c.raw)
        .unwrap_or(Value::Null);
    let record = event_record_for(event, author, &payload);
    store.insert_standalone_event(&record).await
}

async fn publish_rejection(
    event: &SignedEvent,
    sender: &PublicKey,
    receiver: Option<&PublicKey>,
    reason: &RejectionReason,
    outbox: &dyn OutboxPort,
) {
    let Some(receiver) = receiver else { return };
    let variant = event
        .transaction_type_tag()
        .and_then(TransactionVariant::from_start_tag)
        .map(|v| v.descriptor())
        .unwrap_or("unknown-transaction");
    let error_event = publish::error_outcome_event(variant, sender, receiver, &event.id, reason.message());
    let _ = outbox.publish(error_event).await;
}
