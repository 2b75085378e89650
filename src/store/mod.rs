//! C1 — Ledger Store: durable entities with relational integrity and
//! unique-key invariants, exposed as a trait so a Postgres-backed
//! implementation ([`postgres::PostgresStore`]) and an in-memory test double
//! ([`memory::MemoryStore`]) share one contract.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::amount::Amount;
use crate::error::LedgerError;
use crate::substrate::{EventId, PublicKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionTypeId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotId(pub Uuid);

/// The three request variants, in the descriptor form stored in
/// `TransactionType.description`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionVariant {
    Internal,
    Inbound,
    Outbound,
}

impl TransactionVariant {
    pub fn descriptor(&self) -> &'static str {
        match self {
            TransactionVariant::Internal => "internal-transaction",
            TransactionVariant::Inbound => "inbound-transaction",
            TransactionVariant::Outbound => "outbound-transaction",
        }
    }

    pub fn start_tag(&self) -> &'static str {
        match self {
            TransactionVariant::Internal => crate::substrate::TAG_INTERNAL_START,
            TransactionVariant::Inbound => crate::substrate::TAG_INBOUND_START,
            TransactionVariant::Outbound => crate::substrate::TAG_OUTBOUND_START,
        }
    }

    pub fn from_start_tag(tag: &str) -> Option<Self> {
        match tag {
            t if t == crate::substrate::TAG_INTERNAL_START => Some(TransactionVariant::Internal),
            t if t == crate::substrate::TAG_INBOUND_START => Some(TransactionVariant::Inbound),
            t if t == crate::substrate::TAG_OUTBOUND_START => Some(TransactionVariant::Outbound),
            _ => None,
        }
    }
}

/// A stored, immutable record of an observed substrate event. Presence of a
/// row for a given `id` is the idempotency marker (§3 invariant 4).
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub id: EventId,
    pub signature: String,
    pub signer: PublicKey,
    /// The signer, or the delegator when a valid delegation tag is present.
    pub author: PublicKey,
    pub kind: i32,
    /// Parsed request payload; `Value::Null` when parsing failed.
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub transaction_type_id: TransactionTypeId,
    pub event_id: EventId,
    pub payload: Value,
}

/// Current holding of one token by one account — a 1:1 pointer into the
/// snapshot history, denormalised with its own `amount` for read
/// convenience (always equal to `snapshot.amount`).
#[derive(Debug, Clone)]
pub struct BalanceRecord {
    pub account_id: PublicKey,
    pub token_id: TokenId,
    pub snapshot_id: SnapshotId,
    pub event_id: EventId,
    pub amount: Amount,
}

#[derive(Debug, Clone)]
pub struct BalanceSnapshotRecord {
    pub id: SnapshotId,
    pub prev_snapshot_id: Option<SnapshotId>,
    pub amount: Amount,
    pub delta: Amount,
    pub transaction_id: TransactionId,
    pub event_id: EventId,
    pub token_id: TokenId,
    pub account_id: PublicKey,
}

/// C1 contract. Lookups outside a mutation (token/type resolution, plain
/// balance reads, readiness) go through `&self`; anything that mutates goes
/// through a [`LedgerTxn`] obtained from [`begin`](LedgerStore::begin) so
/// the whole request commits or rolls back together (§3 invariant 5).
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn event_exists(&self, id: &EventId) -> Result<bool, LedgerError>;

    /// Persists a terminal, non-transactional Event row: used for
    /// deterministic rejections that never reach C5 (unparsable content,
    /// bad delegation, unauthorised mint/burn before any balance lookup).
    async fn insert_standalone_event(&self, event: &EventRecord) -> Result<(), LedgerError>;

    async fn resolve_token(&self, name: &str) -> Result<Option<TokenId>, LedgerError>;

    async fn resolve_transaction_type(
        &self,
        variant: TransactionVariant,
    ) -> Result<Option<TransactionTypeId>, LedgerError>;

    /// Existing balances for `account` restricted to `tokens`; accounts
    /// with no row for a given token are simply absent from the result.
    async fn load_balances(
        &self,
        account: &PublicKey,
        tokens: &[TokenId],
    ) -> Result<Vec<BalanceRecord>, LedgerError>;

    /// A trivial round-trip used by `/readyz`.
    async fn ping(&self) -> Result<(), LedgerError>;

    async fn begin(&self) -> Result<Box<dyn LedgerTxn>, LedgerError>;
}

/// A single request's mutation phase, scoped to one database transaction.
/// All balance reads inside it should use `FOR UPDATE`-equivalent locking
/// in the Postgres implementation so concurrent requests on the same
/// (account, token) serialise rather than race.
#[async_trait]
pub trait LedgerTxn: Send {
    async fn insert_transaction(
        &mut self,
        transaction_type_id: TransactionTypeId,
        event: &EventRecord,
        payload: Value,
    ) -> Result<TransactionId, LedgerError>;

    /// Balance reads for mutation, taken under row-level locking.
    async fn load_balances_for_update(
        &mut self,
        account: &PublicKey,
        tokens: &[TokenId],
    ) -> Result<Vec<BalanceRecord>, LedgerError>;

    /// Requires `balance.amount >= delta`; returns
    /// `LedgerError::Rejection(RejectionReason::InsufficientFunds)` otherwise
    /// as a last-line defense (the handler is expected to have already
    /// checked sufficiency before calling this).
    async fn debit(
        &mut self,
        balance: &BalanceRecord,
        delta: &Amount,
        transaction_id: TransactionId,
        event_id: &EventId,
    ) -> Result<BalanceRecord, LedgerError>;

    async fn credit(
        &mut self,
        balance: &BalanceRecord,
        delta: &Amount,
        transaction_id: TransactionId,
        event_id: &EventId,
    ) -> Result<BalanceRecord, LedgerError>;

    /// Creates a Balance and its first BalanceSnapshot in one atomic step
    /// for an (account, token) pair with no existing row.
    async fn create_fresh(
        &mut self,
        account: &PublicKey,
        token_id: TokenId,
        delta: &Amount,
        transaction_id: TransactionId,
        event_id: &EventId,
    ) -> Result<BalanceRecord, LedgerError>;

    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;
}
