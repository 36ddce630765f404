use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs4::fs_std::FileExt;
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use crate::errors::StoreError;
use crate::store::{KeyedLocks, LockedRecord, TokenRecord, TokenStore};

/// One JSON record file per backend under `dir`.
///
/// Locking a record takes the in-process key lock, then an exclusive
/// advisory lock on `<dir>/<backend>.lock`, so processes sharing a
/// directory are serialized too.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    dir: PathBuf,
    locks: Arc<KeyedLocks>,
}

impl FileTokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Arc::new(KeyedLocks::default()),
        }
    }

    pub fn record_path(&self, backend: &str) -> PathBuf {
        self.dir.join(format!("{}.json", backend))
    }

    pub fn lock_path(&self, backend: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", backend))
    }

    /// Blocks a worker thread until no other handle holds the lock file.
    async fn lock_file(&self, backend: &str) -> Result<File, StoreError> {
        let path = self.lock_path(backend);
        let io_error = |source: std::io::Error| StoreError::Io {
            backend: backend.to_owned(),
            source,
        };
        fs::create_dir_all(&self.dir).await.map_err(io_error)?;

        tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(std::io::Error::other)
        .and_then(|locked| locked)
        .map_err(io_error)
    }

    async fn read_record(&self, backend: &str) -> Result<TokenRecord, StoreError> {
        let path = self.record_path(backend);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(backend = %backend, path = %path.display(), "no token record yet");
                return Ok(TokenRecord::default());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    backend: backend.to_owned(),
                    source,
                })
            }
        };
        match serde_json::from_str::<TokenRecord>(&content) {
            Ok(record) => Ok(record),
            Err(e) => {
                // hand the raw content up as the token so the cache treats it as malformed
                warn!(backend = %backend, path = %path.display(), error = %e, "unreadable token record");
                Ok(TokenRecord {
                    oauth2_token: Some(content),
                    oauth2_token_expiration_datetime: None,
                })
            }
        }
    }
}

impl TokenStore for FileTokenStore {
    type Record = FileRecord;

    async fn lock(&self, backend: &str) -> Result<FileRecord, StoreError> {
        let guard = self.locks.acquire(backend).await;
        let lock_file = self.lock_file(backend).await?;
        debug!(backend = %backend, "token record locked");
        let current = self.read_record(backend).await?;
        Ok(FileRecord {
            backend: backend.to_owned(),
            path: self.record_path(backend),
            current,
            _lock_file: lock_file,
            _guard: guard,
        })
    }

    async fn peek(&self, backend: &str) -> Result<TokenRecord, StoreError> {
        self.read_record(backend).await
    }
}

#[derive(Debug)]
pub struct FileRecord {
    backend: String,
    path: PathBuf,
    current: TokenRecord,
    // closing the file releases the advisory lock
    _lock_file: File,
    _guard: OwnedMutexGuard<()>,
}

impl LockedRecord for FileRecord {
    fn backend(&self) -> &str {
        &self.backend
    }

    fn persisted_token(&self) -> Option<&str> {
        self.current.oauth2_token.as_deref()
    }

    async fn overwrite(&mut self, serialized: String) -> Result<(), StoreError> {
        let record = TokenRecord::from_serialized(&self.backend, Some(serialized));
        let content = serde_json::to_vec_pretty(&record).map_err(|e| StoreError::Corrupted {
            backend: self.backend.clone(),
            reason: e.to_string(),
        })?;
        write_atomic(&self.path, &content)
            .await
            .map_err(|source| StoreError::Io {
                backend: self.backend.clone(),
                source,
            })?;
        self.current = record;
        Ok(())
    }
}

/// Unique tmp file (0600) next to the target, renamed over it.
async fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).await?;

    let path = path.to_path_buf();
    let content = content.to_vec();
    tokio::task::spawn_blocking(move || {
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&content)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file().set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map(|_| ()).map_err(|e| e.error)
    })
    .await
    .map_err(std::io::Error::other)?
}
