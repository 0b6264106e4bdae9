//! `simplepay-core`: error kinds, typed identifiers, money.
//!
//! This crate contains no IO and no infrastructure concerns.

pub mod amount;
pub mod error;
pub mod id;

pub use amount::{Amount, AmountError};
pub use error::{AppError, ErrorKind};
pub use id::{SessionId, TransactionId};
