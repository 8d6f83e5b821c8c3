use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bson::raw::RawDocumentBuf;
use flint_store::{KvStore, KvTransaction};

use crate::config::IndexingOptions;
use crate::encoding::key::{data_prefix, parse_data_key, prefix_successor};
use crate::error::EngineError;
use crate::maintain::Maintainer;
use crate::metadata::{store_index, CollectionHandle, IndexMetadata, IndexState};

/// Cooperative cancellation checked between build batches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Populates indexes for a collection that already has data.
///
/// The scan runs in bounded batches, one fresh transaction per batch,
/// so each commit stays well under the store's transaction ceiling.
/// Cancellation between batches leaves target indexes in `Building`,
/// safe to resume; entries are idempotent and counters track the live
/// entry set, so re-running is harmless.
pub struct IndexBuilder<'a, S: KvStore> {
    store: &'a S,
    options: &'a IndexingOptions,
}

impl<'a, S: KvStore> IndexBuilder<'a, S> {
    pub fn new(store: &'a S, options: &'a IndexingOptions) -> Self {
        Self { store, options }
    }

    /// Drive every `Inactive` (or previously interrupted `Building`)
    /// index of the collection to `Active`. Returns the index list
    /// with final states.
    pub fn build_collection(
        &self,
        handle: &mut CollectionHandle,
        cancel: &CancelToken,
    ) -> Result<Vec<IndexMetadata>, EngineError> {
        let targets: Vec<u32> = handle
            .indexes
            .iter()
            .filter(|ix| matches!(ix.state, IndexState::Inactive | IndexState::Building))
            .map(|ix| ix.id)
            .collect();
        if targets.is_empty() {
            return Ok(handle.indexes.clone());
        }

        // Mark targets BUILDING first: from here the collection write
        // path maintains them, so the scan plus concurrent writes is
        // equivalent to a snapshot scan plus replay.
        let table_index_name = handle.table_index_name.clone();
        {
            let txn = self.store.begin(false)?;
            for id in &targets {
                let meta = handle.index_mut(*id)?;
                if meta.state == IndexState::Inactive {
                    meta.transition(IndexState::Building)?;
                }
                store_index(&txn, &table_index_name, meta)?;
            }
            txn.commit()?;
        }
        tracing::info!(
            collection = %handle.schema.name,
            indexes = targets.len(),
            "index build started"
        );

        let data_lo = data_prefix(&handle.table_index_name);
        let data_hi = prefix_successor(&data_lo);
        let mut checkpoint: Option<Vec<u8>> = None;
        let mut scanned: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                tracing::warn!(scanned, "index build cancelled between batches");
                return Err(EngineError::Cancelled);
            }

            let lo = match &checkpoint {
                None => data_lo.clone(),
                // Resume immediately after the last scanned row.
                Some(last) => {
                    let mut next = last.clone();
                    next.push(0x00);
                    next
                }
            };

            let txn = self.store.begin(false)?;
            let maintainer = Maintainer::new(handle, self.options);
            let deadline =
                Instant::now() + Duration::from_millis(self.options.build_batch_deadline_ms);
            let mut rows = 0usize;
            let mut bytes = 0usize;
            let mut last_key: Option<Vec<u8>> = None;

            for entry in txn.range_scan(&lo, &data_hi, false)? {
                let (key, value) = entry?;
                let pk = parse_data_key(&key).ok_or_else(|| {
                    EngineError::Codec("malformed data key in collection subspace".into())
                })?;
                let doc = RawDocumentBuf::from_bytes(value)
                    .map_err(|e| EngineError::InvalidDocument(e.to_string()))?;
                for id in &targets {
                    let index = handle.index(*id)?;
                    maintainer.index_document_for(&txn, &doc, &pk, index)?;
                }
                rows += 1;
                bytes += key.len() + doc.as_bytes().len();
                last_key = Some(key);
                if rows >= self.options.build_batch_rows
                    || bytes >= self.options.build_batch_bytes
                    || Instant::now() >= deadline
                {
                    break;
                }
            }

            txn.commit()?;
            scanned += rows as u64;
            match last_key {
                None => break,
                Some(key) => {
                    tracing::debug!(rows, scanned, "index build batch committed");
                    checkpoint = Some(key);
                }
            }
        }

        let txn = self.store.begin(false)?;
        for id in &targets {
            let meta = handle.index_mut(*id)?;
            meta.transition(IndexState::Active)?;
            store_index(&txn, &table_index_name, meta)?;
        }
        txn.commit()?;
        tracing::info!(scanned, "index build complete");

        Ok(handle.indexes.clone())
    }
}
