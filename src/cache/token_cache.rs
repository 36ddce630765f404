use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::token::Token;
use crate::config::backends::{AuthType, BackendConfig};
use crate::errors::{StoreError, TokenError};
use crate::helpers::time::{default_clock, Clock};
use crate::observability::metrics::get_metrics;
use crate::sources::TokenFetcher;
use crate::store::{LockedRecord, TokenRecord, TokenStore};

static L1_TIER: &str = "memory";
static L2_TIER: &str = "store";

/// OAuth2 token of one backend: in-process copy (L1) in front of the
/// persisted record (L2).
///
/// The L1 copy is only trusted after re-checking freshness. Everything
/// else happens under the backend's record lock, so callers sharing the
/// same store never fetch twice for one expiry cycle.
pub struct TokenCache<S: TokenStore, F: TokenFetcher> {
    backend: Arc<BackendConfig>,
    store: Arc<S>,
    fetcher: F,
    clock: Arc<dyn Clock>,
    cached: RwLock<Option<Token>>,
}

impl<S: TokenStore, F: TokenFetcher> TokenCache<S, F> {
    pub fn new(backend: Arc<BackendConfig>, store: Arc<S>, fetcher: F) -> Self {
        Self {
            backend,
            store,
            fetcher,
            clock: default_clock(),
            cached: RwLock::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn backend_id(&self) -> &str {
        &self.backend.tech_name
    }

    /// A fresh token, fetching a new one only if neither tier has one.
    pub async fn get_token(&self) -> Result<Token, TokenError> {
        self.backend.check_auth_fields(AuthType::OAuth2)?;
        let backend = self.backend_id();
        let metrics = get_metrics().await;

        let cached = self.cached.read().await.clone();
        if let Some(token) = cached.filter(|t| t.is_fresh(self.clock.now())) {
            debug!(backend = %backend, "token served from memory");
            metrics.token_cache_hits.with_label_values(&[backend, L1_TIER]).inc();
            return Ok(token);
        }

        let mut record = self.store.lock(backend).await?;
        // someone may have refreshed while we were waiting for the lock
        let persisted = self.read_persisted(&record).await;
        if persisted.is_fresh(self.clock.now()) {
            debug!(backend = %backend, "token served from store");
            metrics.token_cache_hits.with_label_values(&[backend, L2_TIER]).inc();
            self.adopt(persisted.clone()).await;
            return Ok(persisted);
        }

        info!(backend = %backend, absent = persisted.is_empty(), "token stale, refreshing");
        let old_token = Some(&persisted).filter(|t| !t.is_empty());
        let token = self.fetcher.fetch_token(&self.backend.oauth2_params(), old_token).await?;
        self.persist(&mut record, &token).await?;
        Ok(token)
    }

    /// Unconditional fetch. `old_token` defaults to the persisted one.
    pub async fn refresh_token(&self, old_token: Option<Token>) -> Result<Token, TokenError> {
        self.backend.check_auth_fields(AuthType::OAuth2)?;
        let backend = self.backend_id();

        let mut record = self.store.lock(backend).await?;
        let old_token = match old_token {
            Some(token) => token,
            None => self.read_persisted(&record).await,
        };
        info!(backend = %backend, "forced token refresh");
        let token = self
            .fetcher
            .fetch_token(&self.backend.oauth2_params(), Some(&old_token).filter(|t| !t.is_empty()))
            .await?;
        self.persist(&mut record, &token).await?;
        Ok(token)
    }

    /// In-process copy, fresh or not.
    pub async fn cached(&self) -> Option<Token> {
        self.cached.read().await.clone()
    }

    /// Persisted record, read without the lock.
    pub async fn status(&self) -> Result<TokenRecord, TokenError> {
        Ok(self.store.peek(self.backend_id()).await?)
    }

    /// Malformed values are logged and read as the empty token.
    async fn read_persisted(&self, record: &S::Record) -> Token {
        match Token::parse_persisted(record.backend(), record.persisted_token()) {
            Ok(token) => token,
            Err(err) => {
                warn!(backend = %record.backend(), error = %err, "ignoring persisted token");
                get_metrics()
                    .await
                    .malformed_persisted_tokens
                    .with_label_values(&[record.backend()])
                    .inc();
                Token::default()
            }
        }
    }

    async fn persist(&self, record: &mut S::Record, token: &Token) -> Result<(), TokenError> {
        let serialized = token.to_json().map_err(|e| StoreError::Corrupted {
            backend: self.backend_id().to_owned(),
            reason: e.to_string(),
        })?;
        record.overwrite(serialized).await?;
        self.adopt(token.clone()).await;
        Ok(())
    }

    async fn adopt(&self, token: Token) {
        if let Some(expires_at) = token.expires_at {
            get_metrics()
                .await
                .token_expiry_unix
                .with_label_values(&[self.backend_id()])
                .set(expires_at as i64);
        }
        *self.cached.write().await = Some(token);
    }
}
