//! `simplepay-ledger`: account ledger model and transfer decision logic.
//!
//! Pure domain code: no IO, no locking. Persistence and serialization of
//! concurrent transfers live in `simplepay-infra`.

pub mod model;
pub mod transfer;

pub use model::{Account, Counterparty, TransactionRecord};
pub use transfer::{LedgerError, TransferOutcome, TransferRequest, plan_transfer};
