//! Transfer execution: planning from `simplepay-ledger` plus storage plus
//! per-account serialization.
//!
//! ## Concurrency
//!
//! Transfers from the same source account run one at a time behind an async
//! mutex keyed by username. Transfers from different accounts never wait on
//! each other. A lock entry is dropped from the map as soon as nobody holds or
//! waits on it.
//!
//! The commit is additionally a compare-and-set on the balance that was read,
//! so a second process sharing the same database cannot double-spend either.
//! A lost CAS re-reads and re-plans, up to `MAX_COMMIT_ATTEMPTS` times.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, instrument, warn};

use simplepay_core::{AppError, TransactionId};
use simplepay_ledger::{LedgerError, TransactionRecord, TransferRequest, plan_transfer};

use crate::ledger_store::{LedgerStore, LedgerStoreError};

const MAX_COMMIT_ATTEMPTS: u32 = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error(transparent)]
    Rejected(#[from] LedgerError),

    #[error(transparent)]
    Store(LedgerStoreError),

    #[error("ledger store timed out")]
    Timeout,

    #[error("balance kept changing; gave up after {0} attempts")]
    Contention(u32),
}

impl From<TransferError> for AppError {
    fn from(value: TransferError) -> Self {
        match value {
            TransferError::Rejected(e) => e.into(),
            TransferError::Store(_) | TransferError::Timeout | TransferError::Contention(_) => {
                AppError::internal("ledger unavailable")
            }
        }
    }
}

type LockMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// One account's lock, held or awaited. Prunes the map entry on drop once
/// nobody else holds or waits on it.
struct AccountLease {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl Drop for AccountLease {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Clones are only taken under the map lock, so a count of one cannot race.
        if map
            .get(&self.key)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            map.remove(&self.key);
        }
    }
}

pub struct TransferEngine<S> {
    store: S,
    locks: Arc<LockMap>,
    store_timeout: Duration,
}

impl<S: std::fmt::Debug> std::fmt::Debug for TransferEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferEngine")
            .field("store", &self.store)
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

impl<S> TransferEngine<S>
where
    S: LedgerStore,
{
    pub fn new(store: S, store_timeout: Duration) -> Self {
        Self {
            store,
            locks: Arc::new(Mutex::new(HashMap::new())),
            store_timeout,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Number of accounts with a transfer in flight or queued.
    pub fn locked_accounts(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn lease(&self, username: &str) -> AccountLease {
        let mut lease = AccountLease {
            key: username.to_string(),
            guard: None,
            locks: self.locks.clone(),
        };
        // Cloned after `lease` exists, so a cancelled waiter drops the clone
        // before the lease decides whether to prune.
        let waiting = {
            let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(username.to_string()).or_default().clone()
        };
        lease.guard = Some(waiting.lock_owned().await);
        lease
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, LedgerStoreError>>,
    ) -> Result<T, TransferError> {
        match tokio::time::timeout(self.store_timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TransferError::Store(e)),
            Err(_) => {
                error!(timeout = ?self.store_timeout, "ledger store call timed out");
                Err(TransferError::Timeout)
            }
        }
    }

    /// Debit `request.source_username` by `request.amount` in favour of
    /// `request.counterparty_code`, appending exactly one history record.
    ///
    /// On any error the balance and history are unchanged. A commit that times
    /// out is looked up by transaction id before being reported as failed.
    #[instrument(
        skip(self, request),
        fields(username = %request.source_username, counterparty = %request.counterparty_code),
        err(level = "info")
    )]
    pub async fn apply(&self, request: TransferRequest) -> Result<TransactionRecord, TransferError> {
        request.validated_amount()?;

        let _lease = self.lease(&request.source_username).await;

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let account = self
                .bounded(self.store.load_account(&request.source_username))
                .await?;
            let counterparty_known = self
                .bounded(self.store.counterparty_exists(&request.counterparty_code))
                .await?;

            let outcome = plan_transfer(
                account.as_ref(),
                counterparty_known,
                &request,
                TransactionId::new(),
                Utc::now(),
            )?;

            match self
                .bounded(self.store.commit_transfer(
                    &outcome.account,
                    outcome.previous_balance,
                    &outcome.record,
                ))
                .await
            {
                Ok(()) => {
                    info!(
                        transaction_id = %outcome.record.id,
                        amount = %outcome.record.amount,
                        balance = %outcome.account.balance,
                        "transfer committed"
                    );
                    return Ok(outcome.record);
                }
                Err(TransferError::Store(LedgerStoreError::Conflict(reason))) => {
                    warn!(attempt, %reason, "balance moved under us; re-planning");
                }
                Err(TransferError::Timeout) => return self.reconcile(outcome.record).await,
                Err(other) => return Err(other),
            }
        }

        error!(attempts = MAX_COMMIT_ATTEMPTS, "giving up on contended transfer");
        Err(TransferError::Contention(MAX_COMMIT_ATTEMPTS))
    }

    /// Settle a commit whose acknowledgement never arrived: if the record is
    /// in the ledger the transfer happened.
    async fn reconcile(&self, record: TransactionRecord) -> Result<TransactionRecord, TransferError> {
        match self.bounded(self.store.record_exists(record.id)).await {
            Ok(true) => {
                warn!(transaction_id = %record.id, "commit acknowledged late; transfer is in the ledger");
                Ok(record)
            }
            Ok(false) => Err(TransferError::Timeout),
            Err(e) => {
                error!(transaction_id = %record.id, error = %e, "could not confirm commit outcome");
                Err(TransferError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_store::{InMemoryLedgerStore, LedgerSeed};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use simplepay_core::{Amount, ErrorKind};
    use simplepay_ledger::{Account, Counterparty};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn amount(v: i64) -> Amount {
        Amount::new(Decimal::new(v, 0)).unwrap()
    }

    fn seeded(balance: i64) -> Arc<InMemoryLedgerStore> {
        Arc::new(InMemoryLedgerStore::from_seed(LedgerSeed {
            accounts: vec![Account::new("sourceUser", "$argon2id$stub", amount(balance))],
            counterparties: vec![Counterparty::new("M1")],
        }))
    }

    fn engine(store: Arc<InMemoryLedgerStore>) -> TransferEngine<Arc<InMemoryLedgerStore>> {
        TransferEngine::new(store, Duration::from_secs(1))
    }

    fn request(code: &str, value: i64) -> TransferRequest {
        TransferRequest::new("sourceUser", code, Decimal::new(value, 0))
    }

    #[tokio::test]
    async fn debits_and_records() {
        let store = seeded(500);
        let engine = engine(store.clone());

        let record = engine.apply(request("M1", 200)).await.unwrap();

        assert_eq!(record.amount, amount(200));
        assert_eq!(record.source_username, "sourceUser");
        assert_eq!(record.counterparty_code, "M1");
        assert_eq!(store.balance("sourceUser"), Some(amount(300)));
        assert_eq!(store.history("sourceUser").await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn overdraft_leaves_everything_unchanged() {
        let store = seeded(100);
        let engine = engine(store.clone());

        let err = engine.apply(request("M1", 150)).await.unwrap_err();

        assert!(matches!(
            err,
            TransferError::Rejected(LedgerError::InsufficientFunds { .. })
        ));
        assert_eq!(AppError::from(err).kind(), ErrorKind::InvalidInput);
        assert_eq!(store.balance("sourceUser"), Some(amount(100)));
        assert_eq!(store.history_len(), 0);
    }

    #[tokio::test]
    async fn exact_balance_drains_to_zero() {
        let store = seeded(100);
        engine(store.clone()).apply(request("M1", 100)).await.unwrap();
        assert_eq!(store.balance("sourceUser"), Some(Amount::ZERO));
    }

    #[tokio::test]
    async fn unknown_counterparty_is_rejected() {
        let store = seeded(500);
        let err = engine(store.clone()).apply(request("NOPE", 10)).await.unwrap_err();

        assert_eq!(
            err,
            TransferError::Rejected(LedgerError::UnknownCounterparty("NOPE".into()))
        );
        assert_eq!(store.balance("sourceUser"), Some(amount(500)));
    }

    #[tokio::test]
    async fn unknown_account_is_rejected() {
        let store = seeded(500);
        let err = engine(store)
            .apply(TransferRequest::new("ghost", "M1", Decimal::ONE))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransferError::Rejected(LedgerError::UnknownAccount("ghost".into()))
        );
    }

    /// Counts calls so tests can assert the store was never reached.
    #[derive(Default)]
    struct CountingStore {
        inner: InMemoryLedgerStore,
        calls: AtomicU32,
        conflicts_left: AtomicU32,
        stall: bool,
        fail_commit: bool,
    }

    #[async_trait]
    impl LedgerStore for CountingStore {
        async fn load_account(&self, username: &str) -> Result<Option<Account>, LedgerStoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.stall {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            self.inner.load_account(username).await
        }

        async fn counterparty_exists(&self, code: &str) -> Result<bool, LedgerStoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.counterparty_exists(code).await
        }

        async fn commit_transfer(
            &self,
            account: &Account,
            expected_balance: Amount,
            record: &TransactionRecord,
        ) -> Result<(), LedgerStoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_commit {
                return Err(LedgerStoreError::Storage("disk full".into()));
            }
            if self
                .conflicts_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(LedgerStoreError::Conflict("simulated".into()));
            }
            self.inner.commit_transfer(account, expected_balance, record).await
        }

        async fn record_exists(&self, id: TransactionId) -> Result<bool, LedgerStoreError> {
            self.inner.record_exists(id).await
        }

        async fn history(&self, username: &str) -> Result<Vec<TransactionRecord>, LedgerStoreError> {
            self.inner.history(username).await
        }
    }

    fn counting(balance: i64) -> CountingStore {
        let store = CountingStore::default();
        store
            .inner
            .upsert_account(Account::new("sourceUser", "h", amount(balance)));
        store.inner.register_counterparty(Counterparty::new("M1"));
        store
    }

    #[tokio::test]
    async fn negative_amount_never_touches_store() {
        let store = Arc::new(counting(500));
        let engine = TransferEngine::new(store.clone(), Duration::from_secs(1));

        let err = engine.apply(request("M1", -5)).await.unwrap_err();

        assert!(matches!(err, TransferError::Rejected(LedgerError::InvalidAmount(_))));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_commit_leaves_no_partial_state() {
        let mut store = counting(500);
        store.fail_commit = true;
        let store = Arc::new(store);
        let engine = TransferEngine::new(store.clone(), Duration::from_secs(1));

        let err = engine.apply(request("M1", 50)).await.unwrap_err();

        assert!(matches!(err, TransferError::Store(LedgerStoreError::Storage(_))));
        assert_eq!(AppError::from(err).kind(), ErrorKind::Internal);
        assert_eq!(store.inner.balance("sourceUser"), Some(amount(500)));
        assert_eq!(store.inner.history_len(), 0);
    }

    #[tokio::test]
    async fn lost_compare_and_set_is_retried() {
        let store = counting(500);
        store.conflicts_left.store(2, Ordering::SeqCst);
        let store = Arc::new(store);
        let engine = TransferEngine::new(store.clone(), Duration::from_secs(1));

        engine.apply(request("M1", 50)).await.unwrap();

        assert_eq!(store.inner.balance("sourceUser"), Some(amount(450)));
        assert_eq!(store.inner.history_len(), 1);
    }

    #[tokio::test]
    async fn persistent_contention_gives_up() {
        let store = counting(500);
        store.conflicts_left.store(MAX_COMMIT_ATTEMPTS, Ordering::SeqCst);
        let store = Arc::new(store);
        let engine = TransferEngine::new(store.clone(), Duration::from_secs(1));

        let err = engine.apply(request("M1", 50)).await.unwrap_err();

        assert_eq!(err, TransferError::Contention(MAX_COMMIT_ATTEMPTS));
        assert_eq!(store.inner.balance("sourceUser"), Some(amount(500)));
    }

    #[tokio::test]
    async fn stalled_store_times_out() {
        let mut store = counting(500);
        store.stall = true;
        let engine = TransferEngine::new(Arc::new(store), Duration::from_millis(20));

        let err = engine.apply(request("M1", 50)).await.unwrap_err();
        assert_eq!(err, TransferError::Timeout);
        assert_eq!(engine.locked_accounts(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_debits_cannot_overdraw() {
        let store = seeded(100);
        let engine = Arc::new(engine(store.clone()));

        let a = tokio::spawn({
            let engine = engine.clone();
            async move { engine.apply(request("M1", 60)).await }
        });
        let b = tokio::spawn({
            let engine = engine.clone();
            async move { engine.apply(request("M1", 60)).await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(TransferError::Rejected(LedgerError::InsufficientFunds { .. }))
        )));
        assert_eq!(store.balance("sourceUser"), Some(amount(40)));
        assert_eq!(store.history_len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn many_small_debits_sum_exactly() {
        let store = seeded(1_000);
        let engine = Arc::new(engine(store.clone()));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.apply(request("M1", 30)).await })
            })
            .collect();

        let mut committed = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                committed += 1;
            }
        }

        // 1000 / 30 = 33 whole debits.
        assert_eq!(committed, 33);
        assert_eq!(store.balance("sourceUser"), Some(amount(10)));
        assert_eq!(store.history_len(), 33);
        assert_eq!(engine.locked_accounts(), 0);
    }

    #[tokio::test]
    async fn different_accounts_do_not_share_a_lock() {
        let store = seeded(100);
        store.upsert_account(Account::new("other", "h", amount(100)));
        let engine = engine(store.clone());

        let held = engine.lease("sourceUser").await;
        let record = tokio::time::timeout(
            Duration::from_millis(500),
            engine.apply(TransferRequest::new("other", "M1", Decimal::TEN)),
        )
        .await
        .expect("other account must not wait")
        .unwrap();

        assert_eq!(record.source_username, "other");
        assert_eq!(engine.locked_accounts(), 1);
        drop(held);
        assert_eq!(engine.locked_accounts(), 0);
    }

    #[tokio::test]
    async fn abandoned_waiter_leaves_no_lock_entry() {
        let engine = engine(seeded(100));

        let held = engine.lease("sourceUser").await;
        let mut waiter = Box::pin(engine.lease("sourceUser"));
        assert!(
            tokio::time::timeout(Duration::from_millis(20), &mut waiter)
                .await
                .is_err()
        );

        // The holder leaves while the waiter is still queued, then the waiter gives up.
        drop(held);
        assert_eq!(engine.locked_accounts(), 1);
        drop(waiter);
        assert_eq!(engine.locked_accounts(), 0);
    }

    /// Stalls its commit acknowledgement, either after writing or before.
    struct SlowCommitStore {
        inner: Arc<InMemoryLedgerStore>,
        writes_before_stalling: bool,
    }

    #[async_trait]
    impl LedgerStore for SlowCommitStore {
        async fn load_account(&self, username: &str) -> Result<Option<Account>, LedgerStoreError> {
            self.inner.load_account(username).await
        }

        async fn counterparty_exists(&self, code: &str) -> Result<bool, LedgerStoreError> {
            self.inner.counterparty_exists(code).await
        }

        async fn commit_transfer(
            &self,
            account: &Account,
            expected_balance: Amount,
            record: &TransactionRecord,
        ) -> Result<(), LedgerStoreError> {
            if self.writes_before_stalling {
                self.inner.commit_transfer(account, expected_balance, record).await?;
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            } else {
                tokio::time::sleep(Duration::from_millis(200)).await;
                self.inner.commit_transfer(account, expected_balance, record).await
            }
        }

        async fn record_exists(&self, id: TransactionId) -> Result<bool, LedgerStoreError> {
            self.inner.record_exists(id).await
        }

        async fn history(&self, username: &str) -> Result<Vec<TransactionRecord>, LedgerStoreError> {
            self.inner.history(username).await
        }
    }

    fn slow_commit_engine(
        inner: Arc<InMemoryLedgerStore>,
        writes_before_stalling: bool,
    ) -> TransferEngine<SlowCommitStore> {
        TransferEngine::new(
            SlowCommitStore {
                inner,
                writes_before_stalling,
            },
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn late_commit_acknowledgement_reports_success() {
        let store = seeded(500);
        let engine = slow_commit_engine(store.clone(), true);

        let record = engine.apply(request("M1", 200)).await.unwrap();

        assert_eq!(record.amount, amount(200));
        assert_eq!(store.balance("sourceUser"), Some(amount(300)));
        assert_eq!(store.history("sourceUser").await.unwrap(), vec![record]);
        assert_eq!(engine.locked_accounts(), 0);
    }

    #[tokio::test]
    async fn commit_that_never_lands_times_out() {
        let store = seeded(500);
        let engine = slow_commit_engine(store.clone(), false);

        let err = engine.apply(request("M1", 200)).await.unwrap_err();

        assert_eq!(err, TransferError::Timeout);
        assert_eq!(store.balance("sourceUser"), Some(amount(500)));
        assert_eq!(store.history_len(), 0);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

            #[test]
            fn history_accounts_for_every_cent(
                initial in 0i64..10_000,
                debits in proptest::collection::vec(-50i64..2_000, 1..25),
            ) {
                let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
                let store = seeded(initial);
                let engine = engine(store.clone());

                rt.block_on(async {
                    for value in &debits {
                        let _ = engine.apply(request("M1", *value)).await;
                    }
                });

                let history = rt.block_on(store.history("sourceUser")).unwrap();
                let spent: Decimal = history.iter().map(|r| r.amount.value()).sum();
                let balance = store.balance("sourceUser").unwrap().value();

                prop_assert!(balance >= Decimal::ZERO);
                prop_assert_eq!(balance + spent, Decimal::new(initial, 0));
            }
        }
    }
}
