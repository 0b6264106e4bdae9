//! Credential lookups served straight from the ledger's account records.

use async_trait::async_trait;

use simplepay_auth::{IdentityLookup, LookupError};

use crate::ledger_store::LedgerStore;

/// Adapts any [`LedgerStore`] into an [`IdentityLookup`].
#[derive(Debug, Clone)]
pub struct LedgerIdentityLookup<S> {
    store: S,
}

impl<S> LedgerIdentityLookup<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S> IdentityLookup for LedgerIdentityLookup<S>
where
    S: LedgerStore,
{
    async fn credential_hash(&self, username: &str) -> Result<Option<String>, LookupError> {
        self.store
            .load_account(username)
            .await
            .map(|account| account.map(|a| a.credential_hash))
            .map_err(|e| LookupError(e.to_string()))
    }
}
