//! Persisted token records.
//!
//! A record is the authoritative (L2) copy of a backend's OAuth2 token. Every
//! writer goes through [`TokenStore::lock`], which hands out an exclusive
//! per-backend guard; callers for other backends are never blocked by it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use crate::cache::token::Token;
use crate::errors::StoreError;

pub mod configured;
pub mod file;
pub mod memory;

pub use configured::ConfiguredStore;
pub use file::FileTokenStore;
pub use memory::MemoryTokenStore;

/// Token columns of a backend record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Serialized [`Token`].
    pub oauth2_token: Option<String>,
    /// Derived from `expires_at`, for display.
    pub oauth2_token_expiration_datetime: Option<DateTime<Utc>>,
}

impl TokenRecord {
    pub fn from_serialized(backend: &str, oauth2_token: Option<String>) -> Self {
        let oauth2_token_expiration_datetime = match Token::parse_persisted(backend, oauth2_token.as_deref()) {
            Ok(token) => token.expiration_datetime(),
            Err(err) => {
                warn!(backend = %backend, error = %err, "could not determine token expiration date");
                None
            }
        };
        Self {
            oauth2_token,
            oauth2_token_expiration_datetime,
        }
    }
}

/// Record store keyed by backend tech name.
pub trait TokenStore: Send + Sync + 'static {
    type Record: LockedRecord;

    /// Waits for the exclusive lock on `backend`'s record and reads it.
    fn lock(&self, backend: &str) -> impl Future<Output = Result<Self::Record, StoreError>> + Send;

    /// Unlocked read; may be stale by the time the caller looks at it.
    fn peek(&self, backend: &str) -> impl Future<Output = Result<TokenRecord, StoreError>> + Send;
}

/// A backend record held under its exclusive lock. Dropping it releases the lock.
pub trait LockedRecord: Send + Sync {
    fn backend(&self) -> &str;

    /// Token value as read when the lock was taken (or last overwritten).
    fn persisted_token(&self) -> Option<&str>;

    /// Replaces the persisted token wholesale.
    fn overwrite(&mut self, serialized: String) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// One async mutex per backend key.
#[derive(Debug, Default)]
pub(crate) struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub(crate) async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
