//! Postgres-backed [`LedgerStore`].
//!
//! Every query here is runtime-composed via `sqlx::query`/`query_scalar`
//! rather than the `query!`/`query_as!` macros: those require a reachable
//! `DATABASE_URL` (or a checked-in offline cache) at build time, which this
//! crate cannot assume. Amounts cross the wire as decimal strings bound
//! into `NUMERIC` columns (`$n::numeric`) rather than through a native
//! bignum binding — see [`crate::amount::Amount::to_numeric_string`].

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Row, Transaction as SqlxTransaction};
use uuid::Uuid;

use crate::amount::Amount;
use crate::error::{LedgerError, RejectionReason};
use crate::store::{
    BalanceRecord, EventRecord, LedgerStore, LedgerTxn, SnapshotId, TokenId, TransactionId,
    TransactionTypeId, TransactionVariant,
};
use crate::substrate::{EventId, PublicKey};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        PostgresStore { pool }
    }
}

fn row_to_balance(row: &sqlx::postgres::PgRow) -> Result<BalanceRecord, LedgerError> {
    let amount: String = row.try_get("amount")?;
    Ok(BalanceRecord {
        account_id: PublicKey(row.try_get("account_id")?),
        token_id: TokenId(row.try_get("token_id")?),
        snapshot_id: SnapshotId(row.try_get("snapshot_id")?),
        event_id: EventId(row.try_get("event_id")?),
        amount: Amount::from_numeric_string(&amount)
            .map_err(|_| LedgerError::Transient("corrupt NUMERIC balance amount".into()))?,
    })
}

#[async_trait]
impl LedgerStore for PostgresStore {
    async fn event_exists(&self, id: &EventId) -> Result<bool, LedgerError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM events WHERE id = $1")
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    async fn insert_standalone_event(&self, event: &EventRecord) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO events (id, signature, signer, author, kind, payload) \
             VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (id) DO NOTHING",
        )
        .bind(&event.id.0)
        .bind(&event.signature)
        .bind(&event.signer.0)
        .bind(&event.author.0)
        .bind(event.kind)
        .bind(&event.payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn resolve_token(&self, name: &str) -> Result<Option<TokenId>, LedgerError> {
        let row: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM tokens WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id,)| TokenId(id)))
    }

    async fn resolve_transaction_type(
        &self,
        variant: TransactionVariant,
    ) -> Result<Option<TransactionTypeId>, LedgerError> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM transaction_types WHERE description = $1")
                .bind(variant.descriptor())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id,)| TransactionTypeId(id)))
    }

    async fn load_balances(
        &self,
        account: &PublicKey,
        tokens: &[TokenId],
    ) -> Result<Vec<BalanceRecord>, LedgerError> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let token_ids: Vec<Uuid> = tokens.iter().map(|t| t.0).collect();
        let rows = sqlx::query(
            "SELECT account_id, token_id, snapshot_id, event_id, amount \
             FROM balances WHERE account_id = $1 AND token_id = ANY($2)",
        )
        .bind(&account.0)
        .bind(&token_ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_balance).collect()
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTxn>, LedgerError> {
        let mut txn = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *txn)
            .await?;
        Ok(Box::new(PostgresTxn { txn: Some(txn) }))
    }
}

struct PostgresTxn {
    txn: Option<SqlxTransaction<'static, Postgres>>,
}

impl PostgresTxn {
    fn txn(&mut self) -> &mut SqlxTransaction<'static, Postgres> {
        self.txn.as_mut().expect("txn used after commit")
    }
}

#[async_trait]
impl LedgerTxn for PostgresTxn {
    async fn insert_transaction(
        &mut self,
        transaction_type_id: TransactionTypeId,
        event: &EventRecord,
        payload: Value,
    ) -> Result<TransactionId, LedgerError> {
        sqlx::query(
            "INSERT INTO events (id, signature, signer, author, kind, payload) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&event.id.0)
        .bind(&event.signature)
        .bind(&event.signer.0)
        .bind(&event.author.0)
        .bind(event.kind)
        .bind(&event.payload)
        .execute(&mut *self.txn())
        .await?;

        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO transactions (id, transaction_type_id, event_id, payload) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(transaction_type_id.0)
        .bind(&event.id.0)
        .bind(&payload)
        .execute(&mut *self.txn())
        .await?;
        Ok(TransactionId(id))
    }

    async fn load_balances_for_update(
        &mut self,
        account: &PublicKey,
        tokens: &[TokenId],
    ) -> Result<Vec<BalanceRecord>, LedgerError> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let token_ids: Vec<Uuid> = tokens.iter().map(|t| t.0).collect();
        let rows = sqlx::query(
            "SELECT account_id, token_id, snapshot_id, event_id, amount \
             FROM balances WHERE account_id = $1 AND token_id = ANY($2) FOR UPDATE",
        )
        .bind(&account.0)
        .bind(&token_ids)
        .fetch_all(&mut *self.txn())
        .await?;
        rows.iter().map(row_to_balance).collect()
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
        self.append_snapshot(balance, &new_amount, &delta.neg(), transaction_id, event_id)
            .await
    }

    async fn credit(
        &mut self,
        balance: &BalanceRecord,
        delta: &Amount,
        transaction_id: TransactionId,
        event_id: &EventId,
    ) -> Result<BalanceRecord, LedgerError> {
        let new_amount = balance.amount.checked_add(delta);
        self.append_snapshot(balance, &new_amount, delta, transaction_id, event_id)
            .await
    }

    async fn create_fresh(
        &mut self,
        account: &PublicKey,
        token_id: TokenId,
        delta: &Amount,
        transaction_id: TransactionId,
        event_id: &EventId,
    ) -> Result<BalanceRecord, LedgerError> {
        let snapshot_id = Uuid::new_v4();
        // Single compound statement: the snapshot and the balance row are
        // inserted together so `balances.snapshot_id` is never a dangling
        // foreign key even momentarily (§4.2).
        sqlx::query(
            "WITH new_snapshot AS ( \
                 INSERT INTO balance_snapshots \
                     (id, prev_snapshot_id, amount, delta, transaction_id, event_id, token_id, account_id) \
                 VALUES ($1, NULL, $2::numeric, $2::numeric, $3, $4, $5, $6) \
                 RETURNING id \
             ) \
             INSERT INTO balances (account_id, token_id, snapshot_id, event_id, amount) \
             SELECT $6, $5, new_snapshot.id, $4, $2::numeric FROM new_snapshot",
        )
        .bind(snapshot_id)
        .bind(delta.to_numeric_string())
        .bind(transaction_id.0)
        .bind(&event_id.0)
        .bind(token_id.0)
        .bind(&account.0)
        .execute(&mut *self.txn())
        .await?;

        Ok(BalanceRecord {
            account_id: account.clone(),
            token_id,
            snapshot_id: SnapshotId(snapshot_id),
            event_id: event_id.clone(),
            amount: delta.clone(),
        })
    }

    async fn commit(mut self: Box<Self>) -> Result<(), LedgerError> {
        self.txn.take().expect("txn used after commit").commit().await?;
        Ok(())
    }
}

impl PostgresTxn {
    async fn append_snapshot(
        &mut self,
        balance: &BalanceRecord,
        new_amount: &Amount,
        delta: &Amount,
        transaction_id: TransactionId,
        event_id: &EventId,
    ) -> Result<BalanceRecord, LedgerError> {
        let snapshot_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO balance_snapshots \
                 (id, prev_snapshot_id, amount, delta, transaction_id, event_id, token_id, account_id) \
             VALUES ($1, $2, $3::numeric, $4::numeric, $5, $6, $7, $8)",
        )
        .bind(snapshot_id)
        .bind(balance.snapshot_id.0)
        .bind(new_amount.to_numeric_string())
        .bind(delta.to_numeric_string())
        .bind(transaction_id.0)
        .bind(&event_id.0)
        .bind(balance.token_id.0)
        .bind(&balance.account_id.0)
        .execute(&mut *self.txn())
        .await?;

        sqlx::query(
            "UPDATE balances SET snapshot_id = $1, event_id = $2, amount = $3::numeric \
             WHERE account_id = $4 AND token_id = $5",
        )
        .bind(snapshot_id)
        .bind(&event_id.0)
        .bind(new_amount.to_numeric_string())
        .bind(&balance.account_id.0)
        .bind(balance.token_id.0)
        .execute(&mut *self.txn())
        .await?;

        Ok(BalanceRecord {
            account_id: balance.account_id.clone(),
            token_id: balance.token_id,
            snapshot_id: SnapshotId(snapshot_id),
            event_id: event_id.clone(),
            amount: new_amount.clone(),
        })
    }
}
