//! Session store contract: a key-value store with per-key time-to-live.
//!
//! Presence of a key means the session is live. Revocation and expiry are
//! both plain absence and are not distinguished.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionStoreError {
    #[error("session store connection error: {0}")]
    Connection(String),

    #[error("session store command error: {0}")]
    Command(String),
}

/// Capability interface over the session backend.
///
/// Each operation must be atomic on its own; no cross-key transactions are
/// required.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or overwrite `key` with a time-to-live.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SessionStoreError>;

    /// Fetch a live value; expired keys read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, SessionStoreError>;

    /// Delete `key`, returning how many live entries were removed (0 or 1).
    async fn delete(&self, key: &str) -> Result<u64, SessionStoreError>;
}

#[async_trait]
impl<S> SessionStore for Arc<S>
where
    S: SessionStore + ?Sized,
{
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SessionStoreError> {
        (**self).put(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, SessionStoreError> {
        (**self).get(key).await
    }

    async fn delete(&self, key: &str) -> Result<u64, SessionStoreError> {
        (**self).delete(key).await
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    deadline: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.deadline
    }
}

/// In-memory TTL store for tests/dev.
///
/// Expired entries are treated as absent and dropped lazily on write.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn live_count(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .map(|m| m.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }
}

fn poisoned() -> SessionStoreError {
    SessionStoreError::Command("lock poisoned".to_string())
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SessionStoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.retain(|_, e| e.is_live(now));
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                deadline: now + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, SessionStoreError> {
        let now = Instant::now();
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<u64, SessionStoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        match entries.remove(key) {
            Some(e) if e.is_live(now) => Ok(1),
            _ => Ok(0),
        }
    }
}
