//! C4 — Pre-Validation Pipeline.
//!
//! A pure function of the incoming request event and the store: produces a
//! validated [`TxRequest`] or a [`Outcome::Rejected`]. Check ordering is
//! fixed and significant (§4.1): idempotency, content parse, authorship,
//! amount sanity, token existence, transaction-type existence.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::amount::Amount;
use crate::error::{LedgerError, RejectionReason};
use crate::store::{LedgerStore, TokenId, TransactionTypeId, TransactionVariant};
use crate::substrate::{PublicKey, SignedEvent, Tag};

/// A request that has passed every structural and existence check and is
/// ready for a transaction handler to apply.
pub struct TxRequest {
    pub variant: TransactionVariant,
    pub transaction_type_id: TransactionTypeId,
    pub event: SignedEvent,
    pub author: PublicKey,
    pub sender: PublicKey,
    pub receiver: PublicKey,
    /// Requested tokens resolved to store ids, alongside the requested amount.
    pub tokens: BTreeMap<TokenId, Amount>,
    /// Reverse map back to the request's own token names, for composing
    /// balance-announcement events (the wire format addresses tokens by
    /// name, the store by id).
    pub token_names: BTreeMap<TokenId, String>,
    pub memo: Option<String>,
    /// The request content as received, persisted as the Transaction's
    /// payload and echoed verbatim in the ok outcome event.
    pub content_raw: Value,
}

impl TxRequest {
    pub fn token_name(&self, id: TokenId) -> Option<&str> {
        self.token_names.get(&id).map(String::as_str)
    }

    pub fn memo_payload(&self) -> &Value {
        &self.content_raw
    }
}

/// Outcome of running an event through the pipeline.
pub enum Validated {
    Ready(TxRequest),
    /// Event id already seen: stop silently, no publication (§4.1.1).
    Duplicate,
    /// A deterministic rejection. The Event row has already been persisted
    /// (with an empty payload for parse failures) by the time this is
    /// returned; the caller only needs to publish the error outcome.
    Rejected {
        reason: RejectionReason,
        author: PublicKey,
        sender: PublicKey,
        receiver: Option<PublicKey>,
    },
}

/// Runs the full pipeline. `store` supplies idempotency, token, and
/// transaction-type lookups; no Balance is read or mutated here.
pub async fn validate(
    event: &SignedEvent,
    store: &dyn LedgerStore,
) -> Result<Validated, LedgerError> {
    // 1. Idempotency.
    if store.event_exists(&event.id).await? {
        return Ok(Validated::Duplicate);
    }

    let recipients = Tag::p_values(&event.tags);
    let receiver = recipients.get(1).map(|s| PublicKey(s.to_string()));

    // 2. Content parse (also where the "missing second recipient tag"
    // structural defect is folded in, per the resolved open question).
    let content = match (event.parse_content(), &receiver) {
        (Ok(content), Some(_)) => content,
        _ => {
            let author = resolve_author(event).unwrap_or_else(|| event.signer.clone());
            return Ok(Validated::Rejected {
                reason: RejectionReason::UnparsableContent,
                author: author.clone(),
                sender: author,
                receiver: receiver.clone(),
            });
        }
    };
    let receiver = receiver.expect("checked above");

    // 3. Authorship.
    let author = match resolve_author(event) {
        Some(author) => author,
        None => {
            return Ok(Validated::Rejected {
                reason: RejectionReason::BadDelegation,
                author: event.signer.clone(),
                sender: event.signer.clone(),
                receiver: Some(receiver),
            });
        }
    };
    let sender = author.clone();

    // 4. Recipient resolution already folded into step 2 above.

    // 5. Amount sanity: every declared amount must be strictly positive.
    if content.tokens.values().any(|a| !a.is_positive()) {
        return Ok(Validated::Rejected {
            reason: RejectionReason::NonPositiveAmount,
            author,
            sender,
            receiver: Some(receiver),
        });
    }

    // 6. Token existence.
    let mut tokens = BTreeMap::new();
    let mut token_names = BTreeMap::new();
    for (name, amount) in &content.tokens {
        match store.resolve_token(name).await? {
            Some(id) => {
                tokens.insert(id, amount.clone());
                token_names.insert(id, name.clone());
            }
            None => {
                return Ok(Validated::Rejected {
                    reason: RejectionReason::UnsupportedToken,
                    author,
                    sender,
                    receiver: Some(receiver),
                });
            }
        }
    }

    // 7. Transaction-type existence.
    let variant = match event.transaction_type_tag().and_then(TransactionVariant::from_start_tag) {
        Some(v) => v,
        None => {
            return Ok(Validated::Rejected {
                reason: RejectionReason::UnsupportedType,
                author,
                sender,
                receiver: Some(receiver),
            });
        }
    };
    let transaction_type_id = match store.resolve_transaction_type(variant).await? {
        Some(id) => id,
        None => {
            return Ok(Validated::Rejected {
                reason: RejectionReason::UnsupportedType,
                author,
                sender,
                receiver: Some(receiver),
            });
        }
    };

    Ok(Validated::Ready(TxRequest {
        variant,
        transaction_type_id,
        event: event.clone(),
        author,
        sender,
        receiver,
        tokens,
        token_names,
        memo: content.memo,
        content_raw: content.raw,
    }))
}

/// Resolves the author per the delegation convention: the delegator when a
/// non-empty delegation tag is present, else the signer. A delegation tag
/// present but empty/blank is unresolvable.
pub(crate) fn resolve_author(event: &SignedEvent) -> Option<PublicKey> {
    match event.delegation_tag() {
        None => Some(event.signer.clone()),
        Some(value) if !value.trim().is_empty() => Some(PublicKey(value.to_string())),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::substrate::{EventId, KIND_TRANSACTION, TAG_INTERNAL_START};

    fn event_with(tags: Vec<Tag>, content: &str) -> SignedEvent {
        SignedEvent {
            id: EventId("e1".into()),
            signature: "sig".into(),
            signer: PublicKey("signer".into()),
            kind: KIND_TRANSACTION,
            created_at: 0,
            tags,
            content: content.to_string(),
        }
    }

    fn base_tags() -> Vec<Tag> {
        vec![
            Tag::p(&PublicKey("ledger".into())),
            Tag::p(&PublicKey("receiver".into())),
            Tag::t(TAG_INTERNAL_START),
        ]
    }

    #[tokio::test]
    async fn accepts_well_formed_internal_request() {
        let store = MemoryStore::new(&["USD"]);
        let event = event_with(base_tags(), r#"{"tokens":{"USD":10}}"#);
        match validate(&event, &store).await.unwrap() {
            Validated::Ready(req) => {
                assert_eq!(req.sender, PublicKey("signer".into()));
                assert_eq!(req.receiver, PublicKey("receiver".into()));
                assert_eq!(req.tokens.len(), 1);
            }
            _ => panic!("expected Ready"),
        }
    }

    #[tokio::test]
    async fn second_delivery_of_same_id_is_duplicate() {
        let store = MemoryStore::new(&["USD"]);
        store
            .insert_standalone_event(&crate::store::EventRecord {
                id: EventId("e1".into()),
                signature: "sig".into(),
                signer: PublicKey("signer".into()),
                author: PublicKey("signer".into()),
                kind: KIND_TRANSACTION,
                payload: serde_json::Value::Null,
            })
            .await
            .unwrap();

        let event = event_with(base_tags(), r#"{"tokens":{"USD":10}}"#);
        assert!(matches!(
            validate(&event, &store).await.unwrap(),
            Validated::Duplicate
        ));
    }

    #[tokio::test]
    async fn missing_second_recipient_tag_is_rejected_as_unparsable() {
        let store = MemoryStore::new(&["USD"]);
        let tags = vec![Tag::p(&PublicKey("ledger".into())), Tag::t(TAG_INTERNAL_START)];
        let event = event_with(tags, r#"{"tokens":{"USD":10}}"#);
        match validate(&event, &store).await.unwrap() {
            Validated::Rejected { reason, .. } => assert_eq!(reason, RejectionReason::UnparsableContent),
            _ => panic!("expected Rejected"),
        }
    }

    #[tokio::test]
    async fn zero_amount_is_rejected() {
        let store = MemoryStore::new(&["USD"]);
        let event = event_with(base_tags(), r#"{"tokens":{"USD":0}}"#);
        match validate(&event, &store).await.unwrap() {
            Validated::Rejected { reason, .. } => assert_eq!(reason, RejectionReason::NonPositiveAmount),
            _ => panic!("expected Rejected"),
        }
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let store = MemoryStore::new(&["USD"]);
        let event = event_with(base_tags(), r#"{"tokens":{"EUR":10}}"#);
        match validate(&event, &store).await.unwrap() {
            Validated::Rejected { reason, .. } => assert_eq!(reason, RejectionReason::UnsupportedToken),
            _ => panic!("expected Rejected"),
        }
    }

    #[tokio::test]
    async fn blank_delegation_tag_is_bad_delegation() {
        let store = MemoryStore::new(&["USD"]);
        let mut tags = base_tags();
        tags.push(Tag::new("delegation", ["  ".to_string()]));
        let event = event_with(tags, r#"{"tokens":{"USD":10}}"#);
        match validate(&event, &store).await.unwrap() {
            Validated::Rejected { reason, .. } => assert_eq!(reason, RejectionReason::BadDelegation),
            _ => panic!("expected Rejected"),
        }
    }
}
