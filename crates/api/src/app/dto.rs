use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use simplepay_ledger::TransactionRecord;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub merchant_code: String,
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: String,
    pub username: String,
    pub merchant_code: String,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl From<TransactionRecord> for TransactionResponse {
    fn from(value: TransactionRecord) -> Self {
        Self {
            id: value.id.to_string(),
            username: value.source_username,
            merchant_code: value.counterparty_code,
            amount: value.amount.value(),
            timestamp: value.timestamp,
        }
    }
}
