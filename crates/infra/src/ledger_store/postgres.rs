//! Postgres-backed ledger.
//!
//! ## Schema
//!
//! - `ledger_accounts(username PK, credential_hash, balance NUMERIC CHECK (balance >= 0))`
//! - `ledger_counterparties(code PK)`
//! - `ledger_transactions(id UUID PK, source_username FK, counterparty_code FK, amount, occurred_at)`
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | LedgerStoreError |
//! |------------|----------------------|------------------|
//! | Database (check constraint violation) | `23514` | `Conflict` |
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Anything else | | `Storage` |
//!
//! A balance CAS that matches zero rows is also reported as `Conflict`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use simplepay_core::{Amount, TransactionId};
use simplepay_ledger::{Account, TransactionRecord};

use super::{LedgerSeed, LedgerStore, LedgerStoreError};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS ledger_accounts (
        username        TEXT PRIMARY KEY,
        credential_hash TEXT NOT NULL,
        balance         NUMERIC NOT NULL CHECK (balance >= 0)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS ledger_counterparties (
        code TEXT PRIMARY KEY
    )"#,
    r#"CREATE TABLE IF NOT EXISTS ledger_transactions (
        id                UUID PRIMARY KEY,
        source_username   TEXT NOT NULL REFERENCES ledger_accounts(username),
        counterparty_code TEXT NOT NULL REFERENCES ledger_counterparties(code),
        amount            NUMERIC NOT NULL CHECK (amount >= 0),
        occurred_at       TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE INDEX IF NOT EXISTS ledger_transactions_source_idx
        ON ledger_transactions (source_username, occurred_at)"#,
];

#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create tables if missing. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), LedgerStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    /// Insert seed rows, leaving existing accounts and counterparties untouched.
    #[instrument(skip(self, seed), fields(accounts = seed.accounts.len(), counterparties = seed.counterparties.len()), err)]
    pub async fn apply_seed(&self, seed: &LedgerSeed) -> Result<(), LedgerStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for account in &seed.accounts {
            sqlx::query(
                "INSERT INTO ledger_accounts (username, credential_hash, balance) \
                 VALUES ($1, $2, $3) ON CONFLICT (username) DO NOTHING",
            )
            .bind(&account.username)
            .bind(&account.credential_hash)
            .bind(account.balance.value())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("seed_account", e))?;
        }

        for counterparty in &seed.counterparties {
            sqlx::query("INSERT INTO ledger_counterparties (code) VALUES ($1) ON CONFLICT (code) DO NOTHING")
                .bind(&counterparty.code)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("seed_counterparty", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

fn amount_from_row(raw: Decimal, column: &str) -> Result<Amount, LedgerStoreError> {
    Amount::new(raw).map_err(|e| LedgerStoreError::Storage(format!("bad {column} in row: {e}")))
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self), err)]
    async fn load_account(&self, username: &str) -> Result<Option<Account>, LedgerStoreError> {
        let row = sqlx::query(
            "SELECT username, credential_hash, balance FROM ledger_accounts WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_account", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let balance: Decimal = row
            .try_get("balance")
            .map_err(|e| map_sqlx_error("load_account", e))?;
        Ok(Some(Account {
            username: row
                .try_get("username")
                .map_err(|e| map_sqlx_error("load_account", e))?,
            credential_hash: row
                .try_get("credential_hash")
                .map_err(|e| map_sqlx_error("load_account", e))?,
            balance: amount_from_row(balance, "balance")?,
        }))
    }

    #[instrument(skip(self), err)]
    async fn counterparty_exists(&self, code: &str) -> Result<bool, LedgerStoreError> {
        let row = sqlx::query("SELECT 1 AS present FROM ledger_counterparties WHERE code = $1")
            .bind(code)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("counterparty_exists", e))?;
        Ok(row.is_some())
    }

    #[instrument(
        skip(self, account, record),
        fields(username = %account.username, transaction_id = %record.id),
        err
    )]
    async fn commit_transfer(
        &self,
        account: &Account,
        expected_balance: Amount,
        record: &TransactionRecord,
    ) -> Result<(), LedgerStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let updated = sqlx::query(
            "UPDATE ledger_accounts SET balance = $1 WHERE username = $2 AND balance = $3",
        )
        .bind(account.balance.value())
        .bind(&account.username)
        .bind(expected_balance.value())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_balance", e))?;

        if updated.rows_affected() != 1 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(LedgerStoreError::Conflict(format!(
                "balance of '{}' no longer {expected_balance}",
                account.username
            )));
        }

        sqlx::query(
            "INSERT INTO ledger_transactions (id, source_username, counterparty_code, amount, occurred_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(record.id.as_uuid())
        .bind(&record.source_username)
        .bind(&record.counterparty_code)
        .bind(record.amount.value())
        .bind(record.timestamp)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_transaction", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), err)]
    async fn record_exists(&self, id: TransactionId) -> Result<bool, LedgerStoreError> {
        let row = sqlx::query("SELECT 1 AS present FROM ledger_transactions WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("record_exists", e))?;
        Ok(row.is_some())
    }

    #[instrument(skip(self), err)]
    async fn history(&self, username: &str) -> Result<Vec<TransactionRecord>, LedgerStoreError> {
        let rows = sqlx::query(
            "SELECT id, source_username, counterparty_code, amount, occurred_at \
             FROM ledger_transactions WHERE source_username = $1 \
             ORDER BY occurred_at ASC, id ASC",
        )
        .bind(username)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("history", e))?;

        rows.into_iter()
            .map(|row| {
                let id: Uuid = row.try_get("id").map_err(|e| map_sqlx_error("history", e))?;
                let amount: Decimal = row.try_get("amount").map_err(|e| map_sqlx_error("history", e))?;
                let timestamp: DateTime<Utc> = row
                    .try_get("occurred_at")
                    .map_err(|e| map_sqlx_error("history", e))?;
                Ok(TransactionRecord {
                    id: TransactionId::from_uuid(id),
                    source_username: row
                        .try_get("source_username")
                        .map_err(|e| map_sqlx_error("history", e))?,
                    counterparty_code: row
                        .try_get("counterparty_code")
                        .map_err(|e| map_sqlx_error("history", e))?,
                    amount: amount_from_row(amount, "amount")?,
                    timestamp,
                })
            })
            .collect()
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23514") | Some("23505") => LedgerStoreError::Conflict(msg),
                _ => LedgerStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            LedgerStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => LedgerStoreError::Storage(format!("{operation}: {other}")),
    }
}
