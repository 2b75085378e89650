//! Outcome and balance-announcement event construction, plus the deferred
//! re-announcement task (§4.3.4).

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::amount::Amount;
use crate::store::{LedgerStore, TokenId};
use crate::substrate::{
    EventId, KIND_BALANCE_ANNOUNCEMENT, KIND_TRANSACTION, OutboxPort, OutgoingEvent, PublicKey,
    RequestContent, Tag,
};

fn variant_tag(variant: &str, suffix: &str) -> String {
    format!("{variant}-{suffix}")
}

/// Builds the `ok` outcome event. The tag list (carried-over `e` tags plus
/// the standard `p`/`e`/`t` tags) is assembled up front as a single `Vec`,
/// never mutated after construction (§9).
pub fn ok_outcome_event(
    variant: &str,
    sender: &PublicKey,
    receiver: &PublicKey,
    request_id: &EventId,
    carried_e_tags: &[Tag],
    content: &RequestContent,
) -> OutgoingEvent {
    let mut tags = vec![
        Tag::p(sender),
        Tag::p(receiver),
        Tag::e(request_id),
        Tag::t(variant_tag(variant, "ok")),
    ];
    tags.extend(carried_e_tags.iter().cloned());

    OutgoingEvent::new(KIND_TRANSACTION, tags, content.raw.to_string())
}

/// Builds the `error` outcome event.
pub fn error_outcome_event(
    variant: &str,
    sender: &PublicKey,
    receiver: &PublicKey,
    request_id: &EventId,
    reason: &str,
) -> OutgoingEvent {
    let tags = vec![
        Tag::p(sender),
        Tag::p(receiver),
        Tag::e(request_id),
        Tag::t(variant_tag(variant, "error")),
    ];
    let content = json!({ "messages": [reason] }).to_string();
    OutgoingEvent::new(KIND_TRANSACTION, tags, content)
}

/// Builds a balance-announcement event (kind 31111, addressed by a stable
/// `d` tag so late subscribers only ever see the current value).
pub fn balance_announcement_event(
    account: &PublicKey,
    token_name: &str,
    amount: &Amount,
    triggering_event: &EventId,
) -> OutgoingEvent {
    let tags = vec![
        Tag::p(account),
        Tag::d(format!("balance:{token_name}:{account}")),
        Tag::e(triggering_event),
        Tag::amount(amount),
    ];
    OutgoingEvent::new(KIND_BALANCE_ANNOUNCEMENT, tags, "{}")
}

/// One (account, token) pair whose balance changed during a commit, kept
/// around so the deferred re-announcement can re-query it.
#[derive(Debug, Clone)]
pub struct AffectedBalance {
    pub account: PublicKey,
    pub token_id: TokenId,
    pub token_name: String,
    /// The balance's amount as of commit, not the request's delta (§6).
    pub amount: Amount,
}

/// Spawns the deferred re-announcement task: after `interval`, re-reads the
/// current balance for each affected (account, token) and republishes it.
/// Cancellable via `shutdown`, so the engine's shutdown path can abort
/// in-flight re-announcements rather than leak the task.
pub fn spawn_deferred_reannouncement(
    store: Arc<dyn LedgerStore>,
    outbox: Arc<dyn OutboxPort>,
    affected: Vec<AffectedBalance>,
    triggering_event: EventId,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = sleep(interval) => {}
            _ = shutdown.changed() => return,
        }
        if *shutdown.borrow() {
            return;
        }

        for balance in affected {
            let token_ids = [balance.token_id];
            let Ok(rows) = store.load_balances(&balance.account, &token_ids).await else {
                continue;
            };
            let Some(row) = rows.into_iter().next() else {
                continue;
            };
            let event = balance_announcement_event(
                &balance.account,
                &balance.token_name,
                &row.amount,
                &triggering_event,
            );
            let _ = outbox.publish(event).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn ok_outcome_carries_request_e_tags() {
        let sender = PublicKey("alice".into());
        let receiver = PublicKey("bob".into());
        let request_id = EventId("req-1".into());
        let carried = vec![Tag::e(&EventId("thread-root".into()))];
        let content = RequestContent {
            tokens: Default::default(),
            memo: None,
            raw: Value::Null,
        };

        let event = ok_outcome_event("internal-transaction", &sender, &receiver, &request_id, &carried, &content);
        assert_eq!(event.tags.len(), 5);
        assert_eq!(event.tags[3].value(), Some("internal-transaction-ok"));
    }

    #[test]
    fn error_outcome_content_is_message_list() {
        let sender = PublicKey("alice".into());
        let receiver = PublicKey("bob".into());
        let request_id = EventId("req-1".into());
        let event = error_outcome_event("inbound-transaction", &sender, &receiver, &request_id, "Not enough funds");
        assert_eq!(event.content, r#"{"messages":["Not enough funds"]}"#);
    }
}
