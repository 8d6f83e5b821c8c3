use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;
use imbl::OrdMap;

use crate::error::StoreError;
use crate::store::KvStore;

use super::transaction::MemoryTransaction;

pub(crate) type Keyspace = OrdMap<Vec<u8>, Vec<u8>>;

/// In-memory ordered store backed by a persistent map.
///
/// Snapshots are O(1): a transaction clones the `OrdMap` handle and
/// works against its own copy. Only one write transaction exists at a
/// time; commit publishes the working copy atomically.
pub struct MemoryStore {
    data: ArcSwap<Keyspace>,
    write_lock: Mutex<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            data: ArcSwap::new(Arc::new(OrdMap::new())),
            write_lock: Mutex::new(()),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the write lock. Only one write transaction can exist at a time.
    pub(crate) fn acquire_write_lock(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.write_lock
            .lock()
            .map_err(|e| StoreError::Storage(format!("write lock poisoned: {e}")))
    }

    /// Snapshot the current keyspace.
    pub(crate) fn snapshot(&self) -> Keyspace {
        (**self.data.load()).clone()
    }

    /// Publish a committed working copy. The caller must already hold
    /// the write lock, so no conflict detection is needed.
    pub(crate) fn publish(&self, data: Keyspace) {
        self.data.store(Arc::new(data));
    }
}

impl KvStore for MemoryStore {
    type Txn<'a> = MemoryTransaction<'a>;

    fn begin(&self, read_only: bool) -> Result<Self::Txn<'_>, StoreError> {
        if read_only {
            Ok(MemoryTransaction::new_read_only(self))
        } else {
            let guard = self.acquire_write_lock()?;
            Ok(MemoryTransaction::new_writable(self, guard))
        }
    }
}
