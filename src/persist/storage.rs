use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use async_trait::async_trait;

use crate::error::StorageError;

/// Named blob storage used by persisted stores.
///
/// Every method is awaited by the stores, whether or not the backend does
/// any real asynchronous work. Synchronous backends simply never await.
#[async_trait]
pub trait StateStorage: Send + Sync {
    /// Read the blob stored under `name`, or `None` if there is none.
    async fn get_item(&self, name: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `name`, replacing any previous blob.
    async fn set_item(&self, name: &str, value: String) -> Result<(), StorageError>;

    /// Remove the blob stored under `name`. Removing a missing blob is not
    /// an error.
    async fn remove_item(&self, name: &str) -> Result<(), StorageError>;
}

/// In-memory key/value storage.
#[derive(Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Create a new, empty storage area.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide storage area persisted stores use when no storage is
    /// configured.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<MemoryStorage>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(MemoryStorage::new())))
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every stored blob.
    pub fn clear(&self) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl StateStorage for MemoryStorage {
    async fn get_item(&self, name: &str) -> Result<Option<String>, StorageError> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(name).cloned())
    }

    async fn set_item(&self, name: &str, value: String) -> Result<(), StorageError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        items.insert(name.to_string(), value);
        Ok(())
    }

    async fn remove_item(&self, name: &str) -> Result<(), StorageError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        items.remove(name);
        Ok(())
    }
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("item_count", &self.len())
            .finish()
    }
}

/// Directory-backed storage: one JSON file per name.
///
/// Names are mapped to file names by replacing every character outside
/// `[A-Za-z0-9._-]` with `_`, so distinct names may share a file if they
/// differ only in such characters.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Store blobs under `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the blobs.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        let file: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

#[async_trait]
impl StateStorage for FileStorage {
    async fn get_item(&self, name: &str) -> Result<Option<String>, StorageError> {
        match tokio::fs::read_to_string(self.path_for(name)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_item(&self, name: &str, value: String) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        // Write-then-rename so readers never see a partial blob.
        let path = self.path_for(name);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove_item(&self, name: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

type StorageFactory = Arc<dyn Fn() -> Arc<dyn StateStorage> + Send + Sync>;

/// Where a persisted store gets its storage from.
///
/// Resolved exactly once, when the store is created.
#[derive(Clone)]
pub enum StorageSource {
    /// A fixed storage instance.
    Fixed(Arc<dyn StateStorage>),
    /// A factory producing the storage instance.
    Factory(StorageFactory),
}

impl StorageSource {
    /// Wrap a factory function.
    pub fn factory<F>(f: F) -> Self
    where
        F: Fn() -> Arc<dyn StateStorage> + Send + Sync + 'static,
    {
        StorageSource::Factory(Arc::new(f))
    }

    pub(crate) fn resolve(&self) -> Arc<dyn StateStorage> {
        match self {
            StorageSource::Fixed(storage) => Arc::clone(storage),
            StorageSource::Factory(factory) => factory(),
        }
    }
}

impl Default for StorageSource {
    /// [`MemoryStorage::global`].
    fn default() -> Self {
        StorageSource::Fixed(MemoryStorage::global())
    }
}

impl<S: StateStorage + 'static> From<Arc<S>> for StorageSource {
    fn from(storage: Arc<S>) -> Self {
        StorageSource::Fixed(storage)
    }
}

impl fmt::Debug for StorageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageSource::Fixed(_) => f.write_str("StorageSource::Fixed"),
            StorageSource::Factory(_) => f.write_str("StorageSource::Factory"),
        }
    }
}
