use bson::raw::RawDocument;
use flint_store::KvTransaction;

use crate::config::IndexingOptions;
use crate::encoding::key::{index_parts, index_subspace_prefix, prefix_successor, stats_key};
use crate::encoding::value::IndexValue;
use crate::error::EngineError;
use crate::keyset::{KeySet, KeySetDelta};
use crate::metadata::{load_stats, store_stats, CollectionHandle, IndexMetadata, IndexState};

/// Per-index statistics surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexInfo {
    pub rows: u64,
    pub size: u64,
    pub state: IndexState,
}

/// Applies the index side effects of document mutations.
///
/// Every operation works inside the caller-supplied transaction and
/// never commits on its own; an abort rolls back data and index
/// writes together.
pub struct Maintainer<'a> {
    handle: &'a CollectionHandle,
    options: &'a IndexingOptions,
}

impl<'a> Maintainer<'a> {
    pub fn new(handle: &'a CollectionHandle, options: &'a IndexingOptions) -> Self {
        Self { handle, options }
    }

    fn eligible(&self) -> impl Iterator<Item = &IndexMetadata> {
        self.handle
            .indexes
            .iter()
            .filter(|ix| ix.state.writes_indexed())
    }

    fn key_set(
        &self,
        index_id: u32,
        doc: &RawDocument,
        pk: &[IndexValue],
    ) -> Result<KeySet, EngineError> {
        KeySet::build(
            &self.handle.schema,
            self.options,
            &self.handle.table_index_name,
            index_id,
            doc,
            pk,
        )
    }

    /// Write all entries for a newly inserted document.
    pub fn index_document(
        &self,
        txn: &impl KvTransaction,
        doc: &RawDocument,
        pk: &[IndexValue],
    ) -> Result<(), EngineError> {
        for index in self.eligible() {
            self.index_document_for(txn, doc, pk, index)?;
        }
        Ok(())
    }

    /// Write entries for one specific index (the online builder path).
    pub fn index_document_for(
        &self,
        txn: &impl KvTransaction,
        doc: &RawDocument,
        pk: &[IndexValue],
        index: &IndexMetadata,
    ) -> Result<(), EngineError> {
        let delta = self.key_set(index.id, doc, pk)?.diff(&KeySet::empty());
        self.apply(txn, index.id, &delta)
    }

    /// Diff the old and new documents and apply only the difference;
    /// keys common to both are untouched.
    pub fn update_document(
        &self,
        txn: &impl KvTransaction,
        new_doc: &RawDocument,
        old_doc: &RawDocument,
        pk: &[IndexValue],
    ) -> Result<(), EngineError> {
        for index in self.eligible() {
            let new_set = self.key_set(index.id, new_doc, pk)?;
            let old_set = self.key_set(index.id, old_doc, pk)?;
            self.apply(txn, index.id, &new_set.diff(&old_set))?;
        }
        Ok(())
    }

    /// Clear every entry derived from the deleted document.
    pub fn delete_document(
        &self,
        txn: &impl KvTransaction,
        old_doc: &RawDocument,
        pk: &[IndexValue],
    ) -> Result<(), EngineError> {
        for index in self.eligible() {
            let old_set = self.key_set(index.id, old_doc, pk)?;
            self.apply(txn, index.id, &KeySet::empty().diff(&old_set))?;
        }
        Ok(())
    }

    /// Clear all entries belonging to one index, leaving other
    /// indexes' entries in place. Returns the number of cleared
    /// entries.
    ///
    /// The index id sits between the value and the primary key in the
    /// tuple, so one index is not a contiguous key range; the whole
    /// collection subspace is scanned and filtered.
    pub fn delete_index(
        &self,
        txn: &impl KvTransaction,
        index_id: u32,
    ) -> Result<u64, EngineError> {
        let lo = index_subspace_prefix(&self.handle.table_index_name);
        let hi = prefix_successor(&lo);

        let mut doomed = Vec::new();
        for entry in txn.range_scan(&lo, &hi, false)? {
            let (key, _) = entry?;
            let parts = index_parts(&key).ok_or_else(|| {
                EngineError::Codec("malformed index key in subspace".into())
            })?;
            if parts.index_id == index_id {
                doomed.push(key);
            }
        }

        let removed = doomed.len() as u64;
        for key in doomed {
            txn.clear(&key)?;
        }
        txn.clear(&stats_key(&self.handle.table_index_name, index_id))?;
        Ok(removed)
    }

    /// Read the persisted counters plus the in-memory state.
    pub fn index_info(
        &self,
        txn: &impl KvTransaction,
        index_id: u32,
    ) -> Result<IndexInfo, EngineError> {
        let meta = self.handle.index(index_id)?;
        let stats = load_stats(txn, &self.handle.table_index_name, index_id)?;
        Ok(IndexInfo {
            rows: stats.rows as u64,
            size: stats.size as u64,
            state: meta.state,
        })
    }

    /// Apply a delta and keep the counters in lockstep with the live
    /// entry set: an add of an already-present key (a rebuild pass)
    /// does not double-count.
    fn apply(
        &self,
        txn: &impl KvTransaction,
        index_id: u32,
        delta: &KeySetDelta,
    ) -> Result<(), EngineError> {
        if delta.adds.is_empty() && delta.removes.is_empty() {
            return Ok(());
        }
        let mut stats = load_stats(txn, &self.handle.table_index_name, index_id)?;
        for key in &delta.removes {
            if txn.get(key)?.is_some() {
                stats.rows -= 1;
                stats.size -= key.len() as i64;
                txn.clear(key)?;
            }
        }
        for key in &delta.adds {
            if txn.get(key)?.is_none() {
                stats.rows += 1;
                stats.size += key.len() as i64;
            }
            txn.set(key, &[])?;
        }
        // A negative counter after a committed mutation would break
        // the entry/counter bijection; that is a bug, not a user error.
        assert!(
            stats.rows >= 0 && stats.size >= 0,
            "index {index_id} counters went negative: {stats:?}"
        );
        store_stats(txn, &self.handle.table_index_name, index_id, &stats)
    }
}
