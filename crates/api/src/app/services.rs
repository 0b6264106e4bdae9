//! Service wiring: session store, ledger store, and the three operations the
//! HTTP layer exposes (login, logout, transfer).

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, instrument, warn};

use simplepay_auth::{
    AuthGate, CredentialError, CredentialVerifier, HashCost, InMemorySessionStore, SecretHasher,
    SessionStore, TokenConfig, TokenDetails, TokenError, TokenService, extract_bearer,
};
use simplepay_infra::{
    InMemoryLedgerStore, LedgerIdentityLookup, LedgerSeed, LedgerStore, LedgerStoreError,
    PostgresLedgerStore, TransferEngine,
};
use simplepay_ledger::{TransactionRecord, TransferRequest};

use crate::app::errors::ApiError;
use crate::config::AppConfig;
use crate::context::SessionContext;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("credential setup failed: {0}")]
    Credentials(#[from] CredentialError),

    #[error("token setup failed: {0}")]
    Tokens(#[from] TokenError),

    #[error("ledger setup failed: {0}")]
    Ledger(#[from] LedgerStoreError),

    #[error("session store setup failed: {0}")]
    Sessions(String),
}

pub struct AppServices {
    verifier: CredentialVerifier,
    tokens: Arc<TokenService>,
    gate: Arc<AuthGate>,
    engine: TransferEngine<Arc<dyn LedgerStore>>,
}

impl AppServices {
    pub fn new(
        token_config: TokenConfig,
        sessions: Arc<dyn SessionStore>,
        ledger: Arc<dyn LedgerStore>,
        hasher: SecretHasher,
    ) -> Result<Self, BootstrapError> {
        let store_timeout = token_config.store_timeout;
        let tokens = Arc::new(TokenService::new(token_config, sessions)?);
        let verifier = CredentialVerifier::new(
            Arc::new(LedgerIdentityLookup::new(ledger.clone())),
            hasher,
            store_timeout,
        )?;

        Ok(Self {
            verifier,
            gate: Arc::new(AuthGate::new(tokens.clone())),
            tokens,
            engine: TransferEngine::new(ledger, store_timeout),
        })
    }

    pub fn gate(&self) -> Arc<AuthGate> {
        self.gate.clone()
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        self.engine.store()
    }

    /// Check credentials, then open a session.
    #[instrument(skip(self, password), err(level = "info"))]
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenDetails, ApiError> {
        self.verifier.verify(username, password).await?;
        let details = self.tokens.issue(username).await?;
        info!(session_id = %details.session_id, "session opened");
        Ok(details)
    }

    /// Revoke the session named by a signed token.
    ///
    /// Liveness is not checked first, so a second logout reports the session
    /// as not found rather than unauthorized.
    #[instrument(skip_all, err(level = "info"))]
    pub async fn logout(&self, authorization: Option<&str>) -> Result<(), ApiError> {
        let token = extract_bearer(authorization)?;
        let claims = self.tokens.verify(token, Utc::now())?;
        self.tokens.revoke(claims.sid).await?;
        info!(username = %claims.sub, session_id = %claims.sid, "session closed");
        Ok(())
    }

    /// Debit the session's own account.
    #[instrument(
        skip(self, session),
        fields(username = %session.username(), session_id = %session.session_id()),
        err(level = "info")
    )]
    pub async fn transfer(
        &self,
        session: &SessionContext,
        merchant_code: &str,
        amount: Decimal,
    ) -> Result<TransactionRecord, ApiError> {
        let request = TransferRequest::new(session.username(), merchant_code, amount);
        Ok(self.engine.apply(request).await?)
    }
}

fn load_seed(config: &AppConfig) -> Result<LedgerSeed, BootstrapError> {
    match &config.ledger_seed_file {
        Some(path) => {
            let seed = LedgerSeed::from_json_file(path)?;
            info!(
                path = %path.display(),
                accounts = seed.accounts.len(),
                counterparties = seed.counterparties.len(),
                "loaded ledger seed"
            );
            Ok(seed)
        }
        None => Ok(LedgerSeed::default()),
    }
}

async fn build_ledger(config: &AppConfig) -> Result<Arc<dyn LedgerStore>, BootstrapError> {
    let seed = load_seed(config)?;

    match &config.database_url {
        Some(url) => {
            let pool = sqlx::PgPool::connect(url)
                .await
                .map_err(|e| LedgerStoreError::Storage(format!("connect: {e}")))?;
            let store = PostgresLedgerStore::new(pool);
            store.ensure_schema().await?;
            store.apply_seed(&seed).await?;
            info!("using postgres ledger store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; ledger is in-memory and will not survive restarts");
            Ok(Arc::new(InMemoryLedgerStore::from_seed(seed)))
        }
    }
}

async fn build_sessions(config: &AppConfig) -> Result<Arc<dyn SessionStore>, BootstrapError> {
    match &config.redis_url {
        #[cfg(feature = "redis")]
        Some(url) => {
            let store = simplepay_infra::session_store::RedisSessionStore::connect(url, None)
                .await
                .map_err(|e| BootstrapError::Sessions(e.to_string()))?;
            info!("using redis session store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => {
            warn!("REDIS_URL set but redis feature not enabled, falling back to in-memory");
            Ok(Arc::new(InMemorySessionStore::new()))
        }
        None => {
            warn!("REDIS_URL not set; sessions are in-memory");
            Ok(Arc::new(InMemorySessionStore::new()))
        }
    }
}

/// Wire everything from configuration.
pub async fn build_services(config: &AppConfig) -> Result<AppServices, BootstrapError> {
    let sessions = build_sessions(config).await?;
    let ledger = build_ledger(config).await?;

    let mut token_config = TokenConfig::hs256(
        config.application_name.clone(),
        config.jwt_signature_key.clone().into_bytes(),
        chrono::Duration::minutes(config.access_token_lifetime_minutes),
    );
    token_config.store_timeout = config.store_timeout;

    AppServices::new(
        token_config,
        sessions,
        ledger,
        SecretHasher::new(HashCost::default())?,
    )
}
