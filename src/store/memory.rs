use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedMutexGuard, RwLock};

use crate::errors::StoreError;
use crate::store::{KeyedLocks, LockedRecord, TokenRecord, TokenStore};

/// Process-local record store.
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStore {
    records: Arc<RwLock<HashMap<String, TokenRecord>>>,
    locks: Arc<KeyedLocks>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts a raw persisted value in place, bypassing the lock.
    pub async fn seed(&self, backend: &str, raw: impl Into<String>) {
        let record = TokenRecord::from_serialized(backend, Some(raw.into()));
        self.records.write().await.insert(backend.to_owned(), record);
    }
}

impl TokenStore for MemoryTokenStore {
    type Record = MemoryRecord;

    async fn lock(&self, backend: &str) -> Result<MemoryRecord, StoreError> {
        let guard = self.locks.acquire(backend).await;
        let current = self.records.read().await.get(backend).cloned().unwrap_or_default();
        Ok(MemoryRecord {
            backend: backend.to_owned(),
            current,
            records: self.records.clone(),
            _guard: guard,
        })
    }

    async fn peek(&self, backend: &str) -> Result<TokenRecord, StoreError> {
        Ok(self.records.read().await.get(backend).cloned().unwrap_or_default())
    }
}

#[derive(Debug)]
pub struct MemoryRecord {
    backend: String,
    current: TokenRecord,
    records: Arc<RwLock<HashMap<String, TokenRecord>>>,
    _guard: OwnedMutexGuard<()>,
}

impl LockedRecord for MemoryRecord {
    fn backend(&self) -> &str {
        &self.backend
    }

    fn persisted_token(&self) -> Option<&str> {
        self.current.oauth2_token.as_deref()
    }

    async fn overwrite(&mut self, serialized: String) -> Result<(), StoreError> {
        let record = TokenRecord::from_serialized(&self.backend, Some(serialized));
        self.records
            .write()
            .await
            .insert(self.backend.clone(), record.clone());
        self.current = record;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn overwrite_is_visible_to_next_lock_and_peek() {
        let store = MemoryTokenStore::new();
        {
            let mut record = store.lock("svc").await.unwrap();
            assert!(record.persisted_token().is_none());
            record.overwrite(r#"{"access_token":"a"}"#.into()).await.unwrap();
            assert_eq!(record.persisted_token(), Some(r#"{"access_token":"a"}"#));
        }
        let record = store.lock("svc").await.unwrap();
        assert_eq!(record.persisted_token(), Some(r#"{"access_token":"a"}"#));
        drop(record);

        let peeked = store.peek("svc").await.unwrap();
        assert_eq!(peeked.oauth2_token.as_deref(), Some(r#"{"access_token":"a"}"#));
        assert!(store.peek("other").await.unwrap().oauth2_token.is_none());
    }

    #[tokio::test]
    async fn peek_does_not_wait_for_the_lock() {
        let store = MemoryTokenStore::new();
        store.seed("svc", "{}").await;
        let _held = store.lock("svc").await.unwrap();
        let peeked = tokio::time::timeout(std::time::Duration::from_millis(200), store.peek("svc")).await;
        assert!(peeked.is_ok());
    }
}
