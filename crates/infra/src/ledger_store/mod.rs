//! Account ledger storage boundary.
//!
//! The ledger is three logical collections: accounts keyed by username,
//! counterparties keyed by code, and an append-only transaction history. The
//! physical layout is up to each implementation.

pub mod in_memory;
pub mod postgres;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use simplepay_ledger::{Account, Counterparty, TransactionRecord};

use simplepay_core::{Amount, TransactionId};

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerStoreError {
    /// The balance changed between read and commit.
    #[error("balance changed concurrently: {0}")]
    Conflict(String),

    #[error("ledger storage error: {0}")]
    Storage(String),
}

/// Capability interface over the persisted ledger.
///
/// ## Commit semantics
///
/// `commit_transfer` must write the new balance and append the record as one
/// atomic unit: after it returns, either both are visible or neither is. The
/// balance write is a compare-and-set against `expected_balance`; if the stored
/// balance differs the implementation returns `Conflict` and writes nothing.
///
/// `record_exists` answers whether a commit landed when its acknowledgement
/// never arrived.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn load_account(&self, username: &str) -> Result<Option<Account>, LedgerStoreError>;

    async fn counterparty_exists(&self, code: &str) -> Result<bool, LedgerStoreError>;

    async fn commit_transfer(
        &self,
        account: &Account,
        expected_balance: Amount,
        record: &TransactionRecord,
    ) -> Result<(), LedgerStoreError>;

    async fn record_exists(&self, id: TransactionId) -> Result<bool, LedgerStoreError>;

    /// Transaction history for one account, oldest first.
    async fn history(&self, username: &str) -> Result<Vec<TransactionRecord>, LedgerStoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn load_account(&self, username: &str) -> Result<Option<Account>, LedgerStoreError> {
        (**self).load_account(username).await
    }

    async fn counterparty_exists(&self, code: &str) -> Result<bool, LedgerStoreError> {
        (**self).counterparty_exists(code).await
    }

    async fn commit_transfer(
        &self,
        account: &Account,
        expected_balance: Amount,
        record: &TransactionRecord,
    ) -> Result<(), LedgerStoreError> {
        (**self).commit_transfer(account, expected_balance, record).await
    }

    async fn record_exists(&self, id: TransactionId) -> Result<bool, LedgerStoreError> {
        (**self).record_exists(id).await
    }

    async fn history(&self, username: &str) -> Result<Vec<TransactionRecord>, LedgerStoreError> {
        (**self).history(username).await
    }
}

/// Initial ledger contents (accounts with hashed credentials, counterparties).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LedgerSeed {
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub counterparties: Vec<Counterparty>,
}

impl LedgerSeed {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LedgerStoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LedgerStoreError::Storage(format!("failed to read seed file {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            LedgerStoreError::Storage(format!("failed to parse seed file {}: {e}", path.display()))
        })
    }
}
