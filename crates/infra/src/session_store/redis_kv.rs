//! Redis-backed session store.
//!
//! - **Key**: `simplepay:session:<session id>` (prefix configurable)
//! - **Value**: username
//! - **Expiry**: `SET ... PX <ttl ms>`, so Redis drops the key on its own

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::instrument;

use simplepay_auth::{SessionStore, SessionStoreError};

const DEFAULT_KEY_PREFIX: &str = "simplepay:session:";

#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
    key_prefix: String,
}

impl std::fmt::Debug for RedisSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSessionStore")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisSessionStore {
    /// Connect to `redis_url` (e.g. `redis://localhost:6379`).
    ///
    /// The connection manager reconnects on its own after transient failures.
    pub async fn connect(
        redis_url: impl AsRef<str>,
        key_prefix: Option<String>,
    ) -> Result<Self, SessionStoreError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| SessionStoreError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| SessionStoreError::Connection(e.to_string()))?;

        Ok(Self {
            conn,
            key_prefix: key_prefix.unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

fn command_error(err: redis::RedisError) -> SessionStoreError {
    if err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
        SessionStoreError::Connection(err.to_string())
    } else {
        SessionStoreError::Command(err.to_string())
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    #[instrument(skip(self, value), err)]
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SessionStoreError> {
        // PX 0 is rejected by Redis.
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(command_error)
    }

    #[instrument(skip(self), err)]
    async fn get(&self, key: &str) -> Result<Option<String>, SessionStoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(self.key(key))
            .query_async::<_, Option<String>>(&mut conn)
            .await
            .map_err(command_error)
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, key: &str) -> Result<u64, SessionStoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(self.key(key))
            .query_async::<_, u64>(&mut conn)
            .await
            .map_err(command_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect() -> Option<RedisSessionStore> {
        let url = std::env::var("REDIS_URL").ok()?;
        let prefix = format!("simplepay-test:{}:", uuid::Uuid::new_v4());
        RedisSessionStore::connect(url, Some(prefix)).await.ok()
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL pointing at a disposable Redis"]
    async fn put_get_delete_and_expiry() {
        let Some(store) = connect().await else {
            return;
        };

        store.put("s1", "alice", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("s1").await.unwrap().as_deref(), Some("alice"));
        assert_eq!(store.delete("s1").await.unwrap(), 1);
        assert_eq!(store.delete("s1").await.unwrap(), 0);
        assert_eq!(store.get("s1").await.unwrap(), None);

        store.put("s2", "bob", Duration::from_millis(50)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.get("s2").await.unwrap(), None);
    }
}
