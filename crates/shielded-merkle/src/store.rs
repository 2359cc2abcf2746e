//! key-value storage the accumulator persists into
//!
//! the engine is an external collaborator; anything that offers point reads,
//! atomic batches and ordered prefix scans will do. `MemoryStore` backs tests,
//! `SledStore` backs the cli.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::{MerkleError, Result};

/// one write inside an atomic batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOp {
    pub fn put(key: Vec<u8>, value: impl Into<Vec<u8>>) -> Self {
        BatchOp::Put {
            key,
            value: value.into(),
        }
    }

    pub fn delete(key: Vec<u8>) -> Self {
        BatchOp::Delete { key }
    }
}

pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// apply all ops or none
    fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<()>;

    /// all pairs under `prefix`, in key order
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        (**self).put(key, value)
    }

    fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        (**self).apply_batch(ops)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        (**self).scan_prefix(prefix)
    }
}

/// ordered in-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> MerkleError {
    MerkleError::Storage("memory store lock poisoned".into())
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let map = self.inner.read().map_err(poisoned)?;
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut map = self.inner.write().map_err(poisoned)?;
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        // single write guard, readers never see half a batch
        let mut map = self.inner.write().map_err(poisoned)?;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.inner.read().map_err(poisoned)?;
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// sled-backed store
#[cfg(feature = "sled")]
pub struct SledStore {
    db: sled::Db,
}

#[cfg(feature = "sled")]
impl SledStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("opening sled store at {}", path.display());
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// throwaway database, removed on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(feature = "sled")]
impl KvStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.insert(key, value)?;
        Ok(())
    }

    fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut batch = sled::Batch::default();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => batch.insert(key, value),
                BatchOp::Delete { key } => batch.remove(key),
            }
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.db
            .scan_prefix(prefix)
            .map(|entry| -> Result<(Vec<u8>, Vec<u8>)> {
                let (k, v) = entry?;
                Ok((k.to_vec(), v.to_vec()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn KvStore) {
        assert_eq!(store.get(b"a/1").unwrap(), None);
        store.put(b"a/1", b"one").unwrap();
        store
            .apply_batch(vec![
                BatchOp::put(b"a/2".to_vec(), b"two".to_vec()),
                BatchOp::put(b"b/1".to_vec(), b"other".to_vec()),
                BatchOp::put(b"a/0".to_vec(), b"zero".to_vec()),
            ])
            .unwrap();

        let scanned = store.scan_prefix(b"a/").unwrap();
        let keys: Vec<_> = scanned.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![&b"a/0"[..], &b"a/1"[..], &b"a/2"[..]]);

        store.apply_batch(vec![BatchOp::delete(b"a/1".to_vec())]).unwrap();
        assert_eq!(store.get(b"a/1").unwrap(), None);
        assert_eq!(store.get(b"b/1").unwrap(), Some(b"other".to_vec()));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        exercise(&store);
        assert_eq!(store.len(), 3);
    }

    #[cfg(feature = "sled")]
    #[test]
    fn test_sled_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path().join("db")).unwrap();
        exercise(&store);
    }
}
