use std::cell::RefCell;
use std::ops::Bound;
use std::sync::MutexGuard;

use crate::error::StoreError;
use crate::store::{KvTransaction, ScanIter};

use super::store::{Keyspace, MemoryStore};

pub struct MemoryTransaction<'a> {
    /// Working copy of the keyspace; `None` once consumed.
    working: RefCell<Option<Keyspace>>,
    store: &'a MemoryStore,
    read_only: bool,
    dirty: RefCell<bool>,
    /// Write lock held for the duration of a write transaction.
    _write_guard: Option<MutexGuard<'a, ()>>,
}

impl<'a> MemoryTransaction<'a> {
    pub(crate) fn new_read_only(store: &'a MemoryStore) -> Self {
        Self {
            working: RefCell::new(Some(store.snapshot())),
            store,
            read_only: true,
            dirty: RefCell::new(false),
            _write_guard: None,
        }
    }

    pub(crate) fn new_writable(store: &'a MemoryStore, guard: MutexGuard<'a, ()>) -> Self {
        Self {
            working: RefCell::new(Some(store.snapshot())),
            store,
            read_only: false,
            dirty: RefCell::new(false),
            _write_guard: Some(guard),
        }
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }

    fn with_working<R>(
        &self,
        f: impl FnOnce(&mut Keyspace) -> R,
    ) -> Result<R, StoreError> {
        let mut working = self.working.borrow_mut();
        let data = working.as_mut().ok_or(StoreError::TransactionConsumed)?;
        Ok(f(data))
    }
}

impl<'a> KvTransaction for MemoryTransaction<'a> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.with_working(|data| data.get(key).cloned())
    }

    fn range_scan<'t>(
        &'t self,
        lo: &[u8],
        hi: &[u8],
        reverse: bool,
    ) -> Result<ScanIter<'t>, StoreError> {
        // Clone the persistent map (O(1)) so the iterator owns a stable
        // snapshot of the transaction state at scan time.
        let data = self.with_working(|data| data.clone())?;
        Ok(Box::new(RangeScan::new(data, lo, hi, reverse)))
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.check_writable()?;
        *self.dirty.borrow_mut() = true;
        self.with_working(|data| {
            data.insert(key.to_vec(), value.to_vec());
        })
    }

    fn clear(&self, key: &[u8]) -> Result<(), StoreError> {
        self.check_writable()?;
        *self.dirty.borrow_mut() = true;
        self.with_working(|data| {
            data.remove(key);
        })
    }

    fn clear_range(&self, lo: &[u8], hi: &[u8]) -> Result<(), StoreError> {
        self.check_writable()?;
        *self.dirty.borrow_mut() = true;
        self.with_working(|data| {
            let doomed: Vec<Vec<u8>> = data
                .range((
                    Bound::Included(lo.to_vec()),
                    Bound::Excluded(hi.to_vec()),
                ))
                .map(|(k, _)| k.clone())
                .collect();
            for key in doomed {
                data.remove(&key);
            }
        })
    }

    fn commit(self) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        let working = self
            .working
            .into_inner()
            .ok_or(StoreError::TransactionConsumed)?;
        if *self.dirty.borrow() {
            self.store.publish(working);
        }
        Ok(())
    }

    fn rollback(self) -> Result<(), StoreError> {
        if self.working.into_inner().is_none() {
            return Err(StoreError::TransactionConsumed);
        }
        Ok(())
    }
}

/// Owning cursor over a snapshot of the keyspace.
///
/// Each step re-enters the persistent map from the cursor position, so
/// the iterator holds no borrow into the transaction.
struct RangeScan {
    data: Keyspace,
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    reverse: bool,
    done: bool,
}

impl RangeScan {
    fn new(data: Keyspace, lo: &[u8], hi: &[u8], reverse: bool) -> Self {
        Self {
            data,
            lower: Bound::Included(lo.to_vec()),
            upper: Bound::Excluded(hi.to_vec()),
            reverse,
            done: false,
        }
    }
}

impl Iterator for RangeScan {
    type Item = Result<(Vec<u8>, Vec<u8>), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut range = self.data.range((self.lower.clone(), self.upper.clone()));
        let next = if self.reverse {
            range.next_back()
        } else {
            range.next()
        };
        match next {
            Some((k, v)) => {
                let item = (k.clone(), v.clone());
                if self.reverse {
                    self.upper = Bound::Excluded(k.clone());
                } else {
                    self.lower = Bound::Excluded(k.clone());
                }
                Some(Ok(item))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}
