//! Transfer validation and application (pure decision logic).
//!
//! `plan_transfer` is the read-check-compute half of a transfer. Given the
//! account snapshot and the counterparty lookup result it either rejects the
//! request or returns the updated account together with the history record to
//! append. The caller is responsible for running it inside a per-account
//! critical section and persisting both outputs atomically.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use simplepay_core::{Amount, AppError, TransactionId};

use crate::model::{Account, TransactionRecord};

/// A transfer as requested by an authenticated caller.
///
/// `source_username` always comes from the verified session, never from the
/// request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub source_username: String,
    pub counterparty_code: String,
    pub amount: Decimal,
}

impl TransferRequest {
    pub fn new(
        source_username: impl Into<String>,
        counterparty_code: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        Self {
            source_username: source_username.into(),
            counterparty_code: counterparty_code.into(),
            amount,
        }
    }

    /// Reject negative amounts before any storage is touched.
    pub fn validated_amount(&self) -> Result<Amount, LedgerError> {
        Amount::new(self.amount).map_err(|_| LedgerError::InvalidAmount(self.amount))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("invalid amount")]
    InvalidAmount(Decimal),

    #[error("unknown account")]
    UnknownAccount(String),

    #[error("unknown counterparty")]
    UnknownCounterparty(String),

    #[error("insufficient funds")]
    InsufficientFunds { available: Amount, requested: Amount },
}

impl From<LedgerError> for AppError {
    fn from(value: LedgerError) -> Self {
        AppError::invalid_input(value.to_string())
    }
}

/// Result of a successful transfer decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Source account with the debited balance.
    pub account: Account,
    /// Balance the decision was based on (for compare-and-set on commit).
    pub previous_balance: Amount,
    pub record: TransactionRecord,
}

/// Decide a transfer against a snapshot.
///
/// Check order: amount, account existence, counterparty existence, funds.
/// Both existence checks run before the balance check so the error names the
/// most specific problem. No partial outcome is ever produced.
pub fn plan_transfer(
    account: Option<&Account>,
    counterparty_known: bool,
    request: &TransferRequest,
    id: TransactionId,
    now: DateTime<Utc>,
) -> Result<TransferOutcome, LedgerError> {
    let amount = request.validated_amount()?;

    let account = account
        .filter(|a| a.username == request.source_username)
        .ok_or_else(|| LedgerError::UnknownAccount(request.source_username.clone()))?;

    if !counterparty_known {
        return Err(LedgerError::UnknownCounterparty(
            request.counterparty_code.clone(),
        ));
    }

    let remaining = account
        .balance
        .checked_sub(amount)
        .ok_or(LedgerError::InsufficientFunds {
            available: account.balance,
            requested: amount,
        })?;

    let mut updated = account.clone();
    updated.balance = remaining;

    Ok(TransferOutcome {
        account: updated,
        previous_balance: account.balance,
        record: TransactionRecord {
            id,
            source_username: account.username.clone(),
            counterparty_code: request.counterparty_code.clone(),
            amount,
            timestamp: now,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn amount(v: i64) -> Amount {
        Amount::new(Decimal::new(v, 0)).unwrap()
    }

    fn account(balance: i64) -> Account {
        Account::new("sourceUser", "$argon2id$stub", amount(balance))
    }

    fn request(code: &str, value: i64) -> TransferRequest {
        TransferRequest::new("sourceUser", code, Decimal::new(value, 0))
    }

    #[test]
    fn successful_transfer_debits_and_builds_record() {
        let acct = account(500);
        let id = TransactionId::new();
        let now = Utc::now();

        let outcome = plan_transfer(Some(&acct), true, &request("M1", 200), id, now).unwrap();

        assert_eq!(outcome.account.balance, amount(300));
        assert_eq!(outcome.previous_balance, amount(500));
        assert_eq!(outcome.record.id, id);
        assert_eq!(outcome.record.timestamp, now);
        assert_eq!(outcome.record.source_username, "sourceUser");
        assert_eq!(outcome.record.counterparty_code, "M1");
        assert_eq!(outcome.record.amount, amount(200));
    }

    #[test]
    fn draining_to_exactly_zero_is_allowed() {
        let outcome =
            plan_transfer(Some(&account(100)), true, &request("M1", 100), TransactionId::new(), Utc::now())
                .unwrap();
        assert!(outcome.account.balance.is_zero());
    }

    #[test]
    fn insufficient_funds_is_rejected() {
        let err = plan_transfer(Some(&account(100)), true, &request("M1", 150), TransactionId::new(), Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                available: amount(100),
                requested: amount(150)
            }
        );
        assert_eq!(err.to_string(), "insufficient funds");
    }

    #[test]
    fn negative_amount_is_rejected_first() {
        // Even with no account at all, a negative amount is the reported problem.
        let err = plan_transfer(None, false, &request("M1", -5), TransactionId::new(), Utc::now()).unwrap_err();
        assert_eq!(err, LedgerError::InvalidAmount(Decimal::new(-5, 0)));
    }

    #[test]
    fn unknown_account_wins_over_unknown_counterparty() {
        let err = plan_transfer(None, false, &request("NOPE", 5), TransactionId::new(), Utc::now()).unwrap_err();
        assert_eq!(err, LedgerError::UnknownAccount("sourceUser".into()));
    }

    #[test]
    fn unknown_counterparty_is_checked_before_funds() {
        let err = plan_transfer(Some(&account(10)), false, &request("NOPE", 50), TransactionId::new(), Utc::now())
            .unwrap_err();
        assert_eq!(err, LedgerError::UnknownCounterparty("NOPE".into()));
    }

    #[test]
    fn snapshot_for_another_user_counts_as_unknown() {
        let other = Account::new("someoneElse", "$argon2id$stub", amount(1_000));
        let err = plan_transfer(Some(&other), true, &request("M1", 1), TransactionId::new(), Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::UnknownAccount(_)));
    }

    #[test]
    fn ledger_errors_are_invalid_input() {
        let app: AppError = LedgerError::UnknownCounterparty("X".into()).into();
        assert_eq!(app, AppError::invalid_input("unknown counterparty"));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: applying any sequence of transfers never observes a
        /// negative balance, and the final balance is the initial balance
        /// minus the sum of the accepted amounts.
        #[test]
        fn balance_never_goes_negative(
            initial in 0i64..10_000,
            amounts in prop::collection::vec(-50i64..3_000, 1..40)
        ) {
            let mut acct = account(initial);
            let mut accepted: i64 = 0;

            for value in amounts {
                match plan_transfer(Some(&acct), true, &request("M1", value), TransactionId::new(), Utc::now()) {
                    Ok(outcome) => {
                        prop_assert!(value >= 0);
                        prop_assert!(outcome.account.balance.value() >= Decimal::ZERO);
                        accepted += value;
                        acct = outcome.account;
                    }
                    Err(LedgerError::InsufficientFunds { available, requested }) => {
                        prop_assert!(requested > available);
                        prop_assert_eq!(available, acct.balance);
                    }
                    Err(LedgerError::InvalidAmount(_)) => prop_assert!(value < 0),
                    Err(other) => prop_assert!(false, "unexpected error {other:?}"),
                }
            }

            prop_assert_eq!(acct.balance, amount(initial - accepted));
        }
    }
}
