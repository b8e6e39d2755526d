//! snapshot/batch keyspace over sled
//!
//! sled batches are atomic but write-only, so a write transaction keeps an
//! overlay of staged mutations for read-your-writes, and readers take the
//! shared side of an `RwLock` so no batch can land between their reads.
//! dropping a `WriteTxn` without `commit()` discards the overlay, which
//! rolls the transaction back.

use crate::Result;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub struct Keyspace {
    db: sled::Db,
    lock: RwLock<()>,
}

impl Keyspace {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            db,
            lock: RwLock::new(()),
        })
    }

    /// take a consistent read snapshot. reads stay consistent until the
    /// guard drops, which also serves as the end-read on every exit path.
    pub fn begin_read(&self) -> ReadSnapshot<'_> {
        ReadSnapshot {
            db: &self.db,
            _guard: self.lock.read().unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// take the exclusive write side. mutations stage in the overlay and
    /// land atomically on commit.
    pub fn begin_write(&self) -> WriteTxn<'_> {
        WriteTxn {
            db: &self.db,
            overlay: BTreeMap::new(),
            _guard: self.lock.write().unwrap_or_else(|e| e.into_inner()),
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

pub struct ReadSnapshot<'a> {
    db: &'a sled::Db,
    _guard: RwLockReadGuard<'a, ()>,
}

impl ReadSnapshot<'_> {
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.db.contains_key(key)?)
    }

    /// ascending scan of `[start, end)`
    pub fn range(
        &self,
        start: Vec<u8>,
        end: Vec<u8>,
    ) -> impl Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_ {
        self.db
            .range(start..end)
            .map(|r| r.map(|(k, v)| (k.to_vec(), v.to_vec())).map_err(Into::into))
    }

    /// descending scan of `[start, end)`
    pub fn range_rev(
        &self,
        start: Vec<u8>,
        end: Vec<u8>,
    ) -> impl Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_ {
        self.db
            .range(start..end)
            .rev()
            .map(|r| r.map(|(k, v)| (k.to_vec(), v.to_vec())).map_err(Into::into))
    }
}

pub struct WriteTxn<'a> {
    db: &'a sled::Db,
    overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    _guard: RwLockWriteGuard<'a, ()>,
}

impl WriteTxn<'_> {
    /// read-your-writes point lookup
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(staged) = self.overlay.get(key) {
            return Ok(staged.clone());
        }
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.overlay.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.overlay.insert(key, None);
    }

    /// ascending scan of `[start, end)` merging staged mutations over the
    /// committed state
    pub fn range(&self, start: Vec<u8>, end: Vec<u8>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = self
            .db
            .range(start.clone()..end.clone())
            .map(|r| r.map(|(k, v)| (k.to_vec(), Some(v.to_vec()))))
            .collect::<std::result::Result<_, _>>()?;
        for (k, v) in self
            .overlay
            .range((Bound::Included(start), Bound::Excluded(end)))
        {
            merged.insert(k.clone(), v.clone());
        }
        Ok(merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect())
    }

    /// apply every staged mutation in one atomic batch
    pub fn commit(self) -> Result<()> {
        let mut batch = sled::Batch::default();
        for (key, value) in self.overlay {
            match value {
                Some(v) => batch.insert(key, v),
                None => batch.remove(key),
            }
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }
}

/// smallest key strictly greater than every key with `prefix`
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xff {
            *last += 1;
            return end;
        }
        end.pop();
    }
    // all-0xff prefix: unbounded; sled keys here never reach that shape
    vec![0xff; prefix.len() + 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_your_writes_and_rollback() {
        let dir = tempdir().unwrap();
        let ks = Keyspace::open(dir.path()).unwrap();

        {
            let mut txn = ks.begin_write();
            txn.put(b"a".to_vec(), b"1".to_vec());
            assert_eq!(txn.get(b"a").unwrap(), Some(b"1".to_vec()));
            // dropped without commit
        }
        assert_eq!(ks.begin_read().get(b"a").unwrap(), None);

        let mut txn = ks.begin_write();
        txn.put(b"a".to_vec(), b"1".to_vec());
        txn.put(b"b".to_vec(), b"2".to_vec());
        txn.delete(b"b".to_vec());
        txn.commit().unwrap();

        let snap = ks.begin_read();
        assert_eq!(snap.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(snap.get(b"b").unwrap(), None);
    }

    #[test]
    fn txn_range_merges_overlay() {
        let dir = tempdir().unwrap();
        let ks = Keyspace::open(dir.path()).unwrap();

        let mut txn = ks.begin_write();
        txn.put(b"k1".to_vec(), b"old".to_vec());
        txn.commit().unwrap();

        let mut txn = ks.begin_write();
        txn.put(b"k2".to_vec(), b"staged".to_vec());
        txn.delete(b"k1".to_vec());
        let rows = txn.range(b"k".to_vec(), prefix_end(b"k")).unwrap();
        assert_eq!(rows, vec![(b"k2".to_vec(), b"staged".to_vec())]);
    }

    #[test]
    fn prefix_end_increments() {
        assert_eq!(prefix_end(b"a"), b"b".to_vec());
        assert_eq!(prefix_end(&[1, 0xff]), vec![2]);
    }
}
