use crate::config::settings::StoreConfig;
use crate::errors::StoreError;
use crate::store::file::FileRecord;
use crate::store::memory::MemoryRecord;
use crate::store::{FileTokenStore, LockedRecord, MemoryTokenStore, TokenRecord, TokenStore};

/// Store picked by `settings.store`.
#[derive(Debug, Clone)]
pub enum ConfiguredStore {
    Memory(MemoryTokenStore),
    File(FileTokenStore),
}

impl ConfiguredStore {
    pub fn from_config(cfg: &StoreConfig) -> Self {
        match cfg {
            StoreConfig::Memory => ConfiguredStore::Memory(MemoryTokenStore::new()),
            StoreConfig::File { path } => ConfiguredStore::File(FileTokenStore::new(path.clone())),
        }
    }
}

#[derive(Debug)]
pub enum ConfiguredRecord {
    Memory(MemoryRecord),
    File(FileRecord),
}

impl TokenStore for ConfiguredStore {
    type Record = ConfiguredRecord;

    async fn lock(&self, backend: &str) -> Result<ConfiguredRecord, StoreError> {
        match self {
            ConfiguredStore::Memory(s) => s.lock(backend).await.map(ConfiguredRecord::Memory),
            ConfiguredStore::File(s) => s.lock(backend).await.map(ConfiguredRecord::File),
        }
    }

    async fn peek(&self, backend: &str) -> Result<TokenRecord, StoreError> {
        match self {
            ConfiguredStore::Memory(s) => s.peek(backend).await,
            ConfiguredStore::File(s) => s.peek(backend).await,
        }
    }
}

impl LockedRecord for ConfiguredRecord {
    fn backend(&self) -> &str {
        match self {
            ConfiguredRecord::Memory(r) => r.backend(),
            ConfiguredRecord::File(r) => r.backend(),
        }
    }

    fn persisted_token(&self) -> Option<&str> {
        match self {
            ConfiguredRecord::Memory(r) => r.persisted_token(),
            ConfiguredRecord::File(r) => r.persisted_token(),
        }
    }

    async fn overwrite(&mut self, serialized: String) -> Result<(), StoreError> {
        match self {
            ConfiguredRecord::Memory(r) => r.overwrite(serialized).await,
            ConfiguredRecord::File(r) => r.overwrite(serialized).await,
        }
    }
}
