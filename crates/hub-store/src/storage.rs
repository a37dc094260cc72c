//! KV storage backend (spec §5: "the KV store is the single source of
//! truth; all mutation passes through the engine").
//!
//! Modeled as a single ordered byte-keyed tree, matching the "embedded
//! key-value store ... treated as an ordered byte-keyed transactional map"
//! framing: every row the engine owns, regardless of [`RootPrefix`], lives
//! in one sled tree so range scans over a key prefix see a consistent,
//! lexicographically sorted view. Atomicity across several key writes is
//! provided by [`WriteBatch`] + [`Storage::commit`], which sled applies as
//! a single durable unit.

use sled::{Db, IVec};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// A set of writes applied atomically by [`Storage::commit`].
#[derive(Default)]
pub struct WriteBatch {
    batch: sled::Batch,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl AsRef<[u8]>, value: impl Into<IVec>) {
        self.batch.insert(key.as_ref(), value.into());
    }

    pub fn delete(&mut self, key: impl AsRef<[u8]>) {
        self.batch.remove(key.as_ref());
    }
}

/// The engine's single KV tree, addressed entirely through [`crate::key_codec`].
pub struct Storage {
    db: Db,
    tree: sled::Tree,
}

impl Storage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        let tree = db.open_tree("engine")?;
        Ok(Self { db, tree })
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<IVec>> {
        Ok(self.tree.get(key.as_ref())?)
    }

    pub fn put(&self, key: impl AsRef<[u8]>, value: impl Into<IVec>) -> Result<()> {
        self.tree.insert(key.as_ref(), value.into())?;
        Ok(())
    }

    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<()> {
        self.tree.remove(key.as_ref())?;
        Ok(())
    }

    pub fn contains_key(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        Ok(self.tree.contains_key(key.as_ref())?)
    }

    /// Apply a batch of writes atomically.
    pub fn commit(&self, batch: WriteBatch) -> Result<()> {
        self.tree.apply_batch(batch.batch)?;
        Ok(())
    }

    /// Iterate all rows whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, prefix: impl AsRef<[u8]>) -> impl Iterator<Item = Result<(IVec, IVec)>> {
        self.tree
            .scan_prefix(prefix.as_ref())
            .map(|r| r.map_err(StorageError::from))
    }

    /// Iterate all rows whose key starts with `prefix`, in reverse key order.
    pub fn scan_prefix_rev(
        &self,
        prefix: impl AsRef<[u8]>,
    ) -> impl Iterator<Item = Result<(IVec, IVec)>> {
        self.tree
            .scan_prefix(prefix.as_ref())
            .rev()
            .map(|r| r.map_err(StorageError::from))
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_get_delete_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        storage.put(b"abc", b"1".to_vec()).unwrap();
        assert_eq!(storage.get(b"abc").unwrap().unwrap().as_ref(), b"1");

        storage.delete(b"abc").unwrap();
        assert!(storage.get(b"abc").unwrap().is_none());
    }

    #[test]
    fn batch_commit_is_atomic_from_the_readers_perspective() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        let mut batch = WriteBatch::new();
        batch.put(b"a", b"1".to_vec());
        batch.put(b"b", b"2".to_vec());
        storage.commit(batch).unwrap();

        assert_eq!(storage.get(b"a").unwrap().unwrap().as_ref(), b"1");
        assert_eq!(storage.get(b"b").unwrap().unwrap().as_ref(), b"2");
    }

    #[test]
    fn scan_prefix_returns_rows_in_key_order() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        storage.put(b"p/2", b"".to_vec()).unwrap();
        storage.put(b"p/1", b"".to_vec()).unwrap();
        storage.put(b"q/1", b"".to_vec()).unwrap();

        let keys: Vec<_> = storage
            .scan_prefix(b"p/")
            .map(|r| r.unwrap().0.to_vec())
            .collect();
        assert_eq!(keys, vec![b"p/1".to_vec(), b"p/2".to_vec()]);
    }
}
