use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use simplepay_core::{Amount, TransactionId};
use simplepay_ledger::{Account, Counterparty, TransactionRecord};

use super::{LedgerSeed, LedgerStore, LedgerStoreError};

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<String, Account>,
    counterparties: HashSet<String>,
    history: Vec<TransactionRecord>,
}

/// In-memory ledger.
///
/// Intended for tests/dev. One lock guards all three collections, so a commit
/// is trivially atomic.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<LedgerState>,
}

fn poisoned() -> LedgerStoreError {
    LedgerStoreError::Storage("lock poisoned".to_string())
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: LedgerSeed) -> Self {
        let store = Self::new();
        for account in seed.accounts {
            store.upsert_account(account);
        }
        for counterparty in seed.counterparties {
            store.register_counterparty(counterparty);
        }
        store
    }

    pub fn upsert_account(&self, account: Account) {
        if let Ok(mut state) = self.state.write() {
            state.accounts.insert(account.username.clone(), account);
        }
    }

    pub fn register_counterparty(&self, counterparty: Counterparty) {
        if let Ok(mut state) = self.state.write() {
            state.counterparties.insert(counterparty.code);
        }
    }

    /// Current balance, if the account exists.
    pub fn balance(&self, username: &str) -> Option<Amount> {
        let state = self.state.read().ok()?;
        state.accounts.get(username).map(|a| a.balance)
    }

    /// Total number of history records across all accounts.
    pub fn history_len(&self) -> usize {
        self.state.read().map(|s| s.history.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn load_account(&self, username: &str) -> Result<Option<Account>, LedgerStoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.accounts.get(username).cloned())
    }

    async fn counterparty_exists(&self, code: &str) -> Result<bool, LedgerStoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.counterparties.contains(code))
    }

    async fn commit_transfer(
        &self,
        account: &Account,
        expected_balance: Amount,
        record: &TransactionRecord,
    ) -> Result<(), LedgerStoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;

        let current = state
            .accounts
            .get_mut(&account.username)
            .ok_or_else(|| LedgerStoreError::Storage(format!("account '{}' vanished", account.username)))?;

        if current.balance != expected_balance {
            return Err(LedgerStoreError::Conflict(format!(
                "expected {expected_balance}, found {}",
                current.balance
            )));
        }

        current.balance = account.balance;
        state.history.push(record.clone());
        Ok(())
    }

    async fn record_exists(&self, id: TransactionId) -> Result<bool, LedgerStoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.history.iter().any(|r| r.id == id))
    }

    async fn history(&self, username: &str) -> Result<Vec<TransactionRecord>, LedgerStoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state
            .history
            .iter()
            .filter(|r| r.source_username == username)
            .cloned()
            .collect())
    }
}
