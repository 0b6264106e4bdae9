//! `simplepay-infra`: storage adapters and the transfer engine.
//!
//! - `ledger_store`: ledger persistence (in-memory, Postgres)
//! - `session_store`: networked session backends (Redis, behind the `redis` feature)
//! - `identity`: credential lookups backed by the ledger
//! - `transfer_engine`: serialized, atomic debits

pub mod identity;
pub mod ledger_store;
pub mod session_store;
pub mod transfer_engine;

pub use identity::LedgerIdentityLookup;
pub use ledger_store::{
    InMemoryLedgerStore, LedgerSeed, LedgerStore, LedgerStoreError, PostgresLedgerStore,
};
#[cfg(feature = "redis")]
pub use session_store::RedisSessionStore;
pub use transfer_engine::{TransferEngine, TransferError};
