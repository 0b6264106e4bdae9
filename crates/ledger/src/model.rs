use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use simplepay_core::{Amount, TransactionId};

/// An account holder: login identity plus spendable balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    /// Argon2 PHC string. Never logged, never serialized back to clients.
    pub credential_hash: String,
    pub balance: Amount,
}

impl Account {
    pub fn new(username: impl Into<String>, credential_hash: impl Into<String>, balance: Amount) -> Self {
        Self {
            username: username.into(),
            credential_hash: credential_hash.into(),
            balance,
        }
    }
}

/// A registered transfer destination (merchant).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Counterparty {
    pub code: String,
}

impl Counterparty {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

/// One committed transfer (immutable, append-only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub source_username: String,
    pub counterparty_code: String,
    pub amount: Amount,
    pub timestamp: DateTime<Utc>,
}
