//! In-memory `LedgerStore` test double.
//!
//! Holds the whole store behind one lock and has a transaction hold that
//! lock for its lifetime. That is far coarser than the Postgres
//! implementation's per-row locking, but gives the same observable
//! guarantee the spec asks for: a transaction's effects are atomic and
//! serialise against every other transaction.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::amount::Amount;
use crate::error::{LedgerError, RejectionReason};
use crate::store::{
    BalanceRecord, BalanceSnapshotRecord, EventRecord, LedgerStore, LedgerTxn, SnapshotId,
    TokenId, TransactionId, TransactionRecord, TransactionTypeId, TransactionVariant,
};
use crate::substrate::{EventId, PublicKey};

#[derive(Default)]
struct Inner {
    events: HashMap<EventId, EventRecord>,
    tokens: HashMap<String, TokenId>,
    transaction_types: HashMap<&'static str, TransactionTypeId>,
    transactions: HashMap<TransactionId, TransactionRecord>,
    balances: HashMap<(PublicKey, TokenId), BalanceRecord>,
    snapshots: HashMap<SnapshotId, BalanceSnapshotRecord>,
}

pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Seeds all three transaction types and the given token names, mirroring
    /// what a migration step would pre-seed against Postgres.
    pub fn new(token_names: &[&str]) -> Self {
        let mut inner = Inner::default();
        for variant in [
            TransactionVariant::Internal,
            TransactionVariant::Inbound,
            TransactionVariant::Outbound,
        ] {
            inner
                .transaction_types
                .insert(variant.descriptor(), TransactionTypeId(Uuid::new_v4()));
        }
        for name in token_names {
            inner.tokens.insert(name.to_string(), TokenId(Uuid::new_v4()));
        }
        MemoryStore {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Test helper: current amount for (account, token), `None` if no
    /// balance row exists yet.
    pub async fn balance_of(&self, account: &PublicKey, token: TokenId) -> Option<Amount> {
        let inner = self.inner.lock().await;
        inner
            .balances
            .get(&(account.clone(), token))
            .map(|b| b.amount.clone())
    }

    /// Test helper: number of stored Event rows, for duplicate-delivery assertions.
    pub async fn event_count(&self) -> usize {
        self.inner.lock().await.events.len()
    }

    pub async fn snapshot_chain_len(&self, account: &PublicKey, token: TokenId) -> usize {
        let inner = self.inner.lock().await;
        let Some(balance) = inner.balances.get(&(account.clone(), token)) else {
            return 0;
        };
        let mut len = 0;
        let mut cursor = Some(balance.snapshot_id);
        while let Some(id) = cursor {
            len += 1;
            cursor = inner.snapshots.get(&id).and_then(|s| s.prev_snapshot_id);
        }
        len
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn event_exists(&self, id: &EventId) -> Result<bool, LedgerError> {
        Ok(self.inner.lock().await.events.contains_key(id))
    }

    async fn insert_standalone_event(&self, event: &EventRecord) -> Result<(), LedgerError> {
        self.inner
            .lock()
            .await
            .events
            .insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn resolve_token(&self, name: &str) -> Result<Option<TokenId>, LedgerError> {
        Ok(self.inner.lock().await.tokens.get(name).copied())
    }

    async fn resolve_transaction_type(
        &self,
        variant: TransactionVariant,
    ) -> Result<Option<TransactionTypeId>, LedgerError> {
        Ok(self
            .inner
            .lock()
            .await
            .transaction_types
            .get(variant.descriptor())
            .copied())
    }

    async fn load_balances(
        &self,
        account: &PublicKey,
        tokens: &[TokenId],
    ) -> Result<Vec<BalanceRecord>, LedgerError> {
        let inner = self.inner.lock().await;
        Ok(tokens
            .iter()
            .filter_map(|t| inner.balances.get(&(account.clone(), *t)).cloned())
            .collect())
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        let _ = self.inner.lock().await;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTxn>, LedgerError> {
        let guard = self.inner.clone().lock_owned().await;
        Ok(Box::new(MemoryTxn {
            guard: Some(guard),
        }))
    }
}

struct MemoryTxn {
    guard: Option<OwnedMutexGuard<Inner>>,
}

impl MemoryTxn {
    fn inner(&mut self) -> &mut Inner {
        self.guard.as_mut().expect("txn used after commit")
    }
}

#[async_trait]
impl LedgerTxn for MemoryTxn {
    async fn insert_transaction(
        &mut self,
        transaction_type_id: TransactionTypeId,
        event: &EventRecord,
        payload: Value,
    ) -> Result<TransactionId, LedgerError> {
        let id = TransactionId(Uuid::new_v4());
        let inner = self.inner();
        inner.events.insert(event.id.clone(), event.clone());
        inner.transactions.insert(
            id,
            TransactionRecord {
                id,
                transaction_type_id,
                event_id: event.id.clone(),
                payload,
            },
        );
        Ok(id)
    }

    async fn load_balances_for_update(
        &mut self,
        account: &PublicKey,
        tokens: &[TokenId],
    ) -> Result<Vec<BalanceRecord>, LedgerError> {
        let inner = self.inner();
        Ok(tokens
            .iter()
            .filter_map(|t| inner.balances.get(&(account.clone(), *t)).cloned())
            .collect())
    }

    async fn debit(
        &mut self,
        balance: &BalanceRecord,
        delta: &Amount,
        transaction_id: TransactionId,
        event_id: &EventId,
    ) -> Result<BalanceRecord, LedgerError> {
        if balance.amount < *delta {
            return Err(LedgerError::rejection(RejectionReason::InsufficientFunds));
        }
        let new_amount = balance.amount.checked_sub(delta);
        self.append_snapshot(balance, new_amount, delta.neg(), transaction_id, event_id)
    }

    async fn credit(
        &mut self,
        balance: &BalanceRecord,
        delta: &Amount,
        transaction_id: TransactionId,
        event_id: &EventId,
    ) -> Result<BalanceRecord, LedgerError> {
        let new_amount = balance.amount.checked_add(delta);
        self.append_snapshot(balance, new_amount, delta.clone(), transaction_id, event_id)
    }

    async fn create_fresh(
        &mut self,
        account: &PublicKey,
        token_id: TokenId,
        delta: &Amount,
        transaction_id: TransactionId,
        event_id: &EventId,
    ) -> Result<BalanceRecord, LedgerError> {
        let inner = self.inner();
        if inner.balances.contains_key(&(account.clone(), token_id)) {
            // Mirrors the unique-violation race a concurrent Postgres
            // transaction would hit: treat as transient, retry will Credit.
            return Err(LedgerError::Transient(
                "balance already exists for (account, token)".into(),
            ));
        }
        let snapshot_id = SnapshotId(Uuid::new_v4());
        let snapshot = BalanceSnapshotRecord {
            id: snapshot_id,
            prev_snapshot_id: None,
            amount: delta.clone(),
            delta: delta.clone(),
            transaction_id,
            event_id: event_id.clone(),
            token_id,
            account_id: account.clone(),
        };
        let balance = BalanceRecord {
            account_id: account.clone(),
            token_id,
            snapshot_id,
            event_id: event_id.clone(),
            amount: delta.clone(),
        };
        inner.snapshots.insert(snapshot_id, snapshot);
        inner
            .balances
            .insert((account.clone(), token_id), balance.clone());
        Ok(balance)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), LedgerError> {
        self.guard.take();
        Ok(())
    }
}

impl MemoryTxn {
    fn append_snapshot(
        &mut self,
        balance: &BalanceRecord,
        new_amount: Amount,
        delta: Amount,
        transaction_id: TransactionId,
        event_id: &EventId,
    ) -> Result<BalanceRecord, LedgerError> {
        let snapshot_id = SnapshotId(Uuid::new_v4());
        let snapshot = BalanceSnapshotRecord {
            id: snapshot_id,
            prev_snapshot_id: Some(balance.snapshot_id),
            amount: new_amount.clone(),
            delta,
            transaction_id,
            event_id: event_id.clone(),
            token_id: balance.token_id,
            account_id: balance.account_id.clone(),
        };
        let updated = BalanceRecord {
            account_id: balance.account_id.clone(),
            token_id: balance.token_id,
            snapshot_id,
            event_id: event_id.clone(),
            amount: new_amount,
        };
        let inner = self.inner();
        inner.snapshots.insert(snapshot_id, snapshot);
        inner
            .balances
            .insert((updated.account_id.clone(), updated.token_id), updated.clone());
        Ok(updated)
    }
}
