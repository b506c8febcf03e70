//! Storage trait and implementations

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::StorageError;

/// A set of writes applied together by [`Storage::write_batch`].
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

#[derive(Clone, Debug)]
enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Flat key-value store shared by trees, user data and auth records.
///
/// Implementations use interior mutability so one handle can be cloned into
/// several owners.
pub trait Storage: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;
    fn delete(&self, key: &[u8]) -> Result<(), StorageError>;
    fn write_batch(&self, batch: WriteBatch) -> Result<(), StorageError>;
    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;
    /// Pick up writes made through other handles on the same backing store.
    fn refresh(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

impl<T: Storage + ?Sized> Storage for Arc<T> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        (**self).delete(key)
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), StorageError> {
        (**self).write_batch(batch)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        (**self).scan_prefix(prefix)
    }

    fn refresh(&self) -> Result<(), StorageError> {
        (**self).refresh()
    }
}

/// In-memory storage (for testing and ephemeral trees)
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries. Only for tests / debugging.
    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storage for InMemoryStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let data = self.data.read().map_err(|_| StorageError::Poisoned)?;
        Ok(data.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let mut data = self.data.write().map_err(|_| StorageError::Poisoned)?;
        data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        let mut data = self.data.write().map_err(|_| StorageError::Poisoned)?;
        data.remove(key);
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut data = self.data.write().map_err(|_| StorageError::Poisoned)?;
        apply_batch(&mut data, batch);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let data = self.data.read().map_err(|_| StorageError::Poisoned)?;
        Ok(scan(&data, prefix))
    }
}

/// Storage persisted as a JSON snapshot (hex keys and values).
///
/// Several handles, in one process or many, may share a file. Every write
/// re-reads the snapshot, applies its change on top and renames the result
/// into place, so writes from other handles survive. Reads are served from
/// memory as of the last write or [`Storage::refresh`]. Concurrent writers
/// must still be serialised by the caller, e.g. with a lease.
#[derive(Clone)]
pub struct FileBackedStorage {
    path: PathBuf,
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

impl FileBackedStorage {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let data = load(&path)?;
        Ok(Self {
            path,
            data: Arc::new(RwLock::new(data)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to the current file contents and swap the result in
    /// once it is on disk. A failed write leaves memory untouched.
    fn update(&self, change: impl FnOnce(&mut BTreeMap<Vec<u8>, Vec<u8>>)) -> Result<(), StorageError> {
        let mut data = self.data.write().map_err(|_| StorageError::Poisoned)?;
        let mut next = load(&self.path)?;
        change(&mut next);
        self.flush(&next)?;
        *data = next;
        Ok(())
    }

    fn flush(&self, data: &BTreeMap<Vec<u8>, Vec<u8>>) -> Result<(), StorageError> {
        let snapshot: HashMap<String, String> = data
            .iter()
            .map(|(k, v)| (hex::encode(k), hex::encode(v)))
            .collect();
        let bytes = serde_json::to_vec(&snapshot).map_err(|e| StorageError::Corrupt(e.to_string()))?;

        // write-then-rename so a crash never leaves a truncated snapshot;
        // the temp name is unique per writer
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = self.path.with_extension(format!("tmp.{}.{seq}", std::process::id()));
        std::fs::write(&tmp, bytes)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

fn load(path: &Path) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, StorageError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };
    let snapshot: HashMap<String, String> =
        serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt(e.to_string()))?;
    let mut map = BTreeMap::new();
    for (k, v) in snapshot {
        let key = hex::decode(&k).map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let value = hex::decode(&v).map_err(|e| StorageError::Corrupt(e.to_string()))?;
        map.insert(key, value);
    }
    Ok(map)
}

impl Storage for FileBackedStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let data = self.data.read().map_err(|_| StorageError::Poisoned)?;
        Ok(data.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.update(|data| {
            data.insert(key.to_vec(), value.to_vec());
        })
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.update(|data| {
            data.remove(key);
        })
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), StorageError> {
        self.update(|data| apply_batch(data, batch))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let data = self.data.read().map_err(|_| StorageError::Poisoned)?;
        Ok(scan(&data, prefix))
    }

    fn refresh(&self) -> Result<(), StorageError> {
        let mut data = self.data.write().map_err(|_| StorageError::Poisoned)?;
        *data = load(&self.path)?;
        Ok(())
    }
}

fn apply_batch(data: &mut BTreeMap<Vec<u8>, Vec<u8>>, batch: WriteBatch) {
    for op in batch.ops {
        match op {
            BatchOp::Put(k, v) => {
                data.insert(k, v);
            }
            BatchOp::Delete(k) => {
                data.remove(&k);
            }
        }
    }
}

fn scan(data: &BTreeMap<Vec<u8>, Vec<u8>>, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    data.range(prefix.to_vec()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
