//! Process configuration from environment variables.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration as StdDuration;

use thiserror::Error;
use tracing::warn;

const DEV_SIGNATURE_KEY: &str = "simplepay-dev-signature-key";
const MAX_TOKEN_LIFETIME_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: IpAddr,
    pub port: u16,
    pub application_name: String,
    pub jwt_signature_key: String,
    /// Token lifetime in minutes.
    pub access_token_lifetime_minutes: i64,
    pub store_timeout: StdDuration,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
    pub ledger_seed_file: Option<PathBuf>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("application_name", &self.application_name)
            .field("access_token_lifetime_minutes", &self.access_token_lifetime_minutes)
            .field("store_timeout", &self.store_timeout)
            .field("redis", &self.redis_url.is_some())
            .field("database", &self.database_url.is_some())
            .field("ledger_seed_file", &self.ledger_seed_file)
            .finish_non_exhaustive()
    }
}

fn parse<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => {
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|e| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            })
        }
    }
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key → value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = parse("SERVER_HOST", non_empty(lookup("SERVER_HOST")), IpAddr::from([0, 0, 0, 0]))?;
        let port = parse("SERVER_PORT", non_empty(lookup("SERVER_PORT")), 8080u16)?;

        let application_name =
            non_empty(lookup("APPLICATION_NAME")).unwrap_or_else(|| "simplepay".to_string());

        let jwt_signature_key = non_empty(lookup("JWT_SIGNATURE_KEY")).unwrap_or_else(|| {
            warn!("JWT_SIGNATURE_KEY not set; using insecure dev default");
            DEV_SIGNATURE_KEY.to_string()
        });

        let lifetime_raw = non_empty(lookup("ACCESS_TOKEN_LIFETIME"));
        let access_token_lifetime_minutes = parse("ACCESS_TOKEN_LIFETIME", lifetime_raw.clone(), 15i64)?;
        if !(1..=MAX_TOKEN_LIFETIME_MINUTES).contains(&access_token_lifetime_minutes) {
            return Err(ConfigError::Invalid {
                var: "ACCESS_TOKEN_LIFETIME",
                value: lifetime_raw.unwrap_or_default(),
                reason: format!("must be between 1 and {MAX_TOKEN_LIFETIME_MINUTES} minutes"),
            });
        }

        let timeout_raw = non_empty(lookup("STORE_TIMEOUT_MS"));
        let store_timeout_ms = parse("STORE_TIMEOUT_MS", timeout_raw.clone(), 2000u64)?;
        if store_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                var: "STORE_TIMEOUT_MS",
                value: timeout_raw.unwrap_or_default(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            host,
            port,
            application_name,
            jwt_signature_key,
            access_token_lifetime_minutes,
            store_timeout: StdDuration::from_millis(store_timeout_ms),
            redis_url: non_empty(lookup("REDIS_URL")),
            database_url: non_empty(lookup("DATABASE_URL")),
            ledger_seed_file: non_empty(lookup("LEDGER_SEED_FILE")).map(PathBuf::from),
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
