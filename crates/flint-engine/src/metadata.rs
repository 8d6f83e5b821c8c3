use flint_store::KvTransaction;
use serde::{Deserialize, Serialize};

use crate::encoding::key::{meta_index_key, meta_index_prefix, prefix_successor, stats_key};
use crate::error::EngineError;
use crate::schema::CollectionSchema;

/// Lifecycle of a secondary index.
///
/// `Active` is reached only after a full build pass and is left only
/// by explicit deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexState {
    Inactive,
    Building,
    Active,
    Deleted,
}

impl IndexState {
    pub fn can_transition(self, next: IndexState) -> bool {
        use IndexState::*;
        matches!(
            (self, next),
            (Inactive, Building)
                | (Building, Active)
                | (Building, Inactive)
                | (Inactive, Deleted)
                | (Building, Deleted)
                | (Active, Deleted)
        )
    }

    /// Whether the collection write path must maintain entries for an
    /// index in this state.
    pub fn writes_indexed(self) -> bool {
        matches!(self, Self::Building | Self::Active)
    }

    /// Whether the planner may serve reads from this index.
    pub fn readable(self) -> bool {
        matches!(self, Self::Active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub id: u32,
    pub name: String,
    pub state: IndexState,
    pub schema_rev: u32,
}

impl IndexMetadata {
    /// Apply a state transition, enforcing the machine's edges.
    pub fn transition(&mut self, next: IndexState) -> Result<(), EngineError> {
        if !self.state.can_transition(next) {
            return Err(EngineError::InvalidStateTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

/// Persisted per-index row/size counters. Mutated in the same
/// transaction as the entries they account for, so they never drift
/// after commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub rows: i64,
    pub size: i64,
}

/// A resolved collection: schema, index subspace identifier, and the
/// index list. The caller holds ownership and passes `&CollectionHandle`
/// to maintenance operations.
#[derive(Debug, Clone)]
pub struct CollectionHandle {
    pub schema: CollectionSchema,
    pub table_index_name: Vec<u8>,
    pub indexes: Vec<IndexMetadata>,
}

impl CollectionHandle {
    pub fn index(&self, id: u32) -> Result<&IndexMetadata, EngineError> {
        self.indexes
            .iter()
            .find(|ix| ix.id == id)
            .ok_or(EngineError::IndexNotFound(id))
    }

    pub fn index_mut(&mut self, id: u32) -> Result<&mut IndexMetadata, EngineError> {
        self.indexes
            .iter_mut()
            .find(|ix| ix.id == id)
            .ok_or(EngineError::IndexNotFound(id))
    }
}

// ── Persistence ────────────────────────────────────────────────

pub fn store_index(
    txn: &impl KvTransaction,
    table_index_name: &[u8],
    meta: &IndexMetadata,
) -> Result<(), EngineError> {
    let key = meta_index_key(table_index_name, meta.id);
    let blob = bson::serialize_to_vec(meta)
        .map_err(|e| EngineError::InvalidDocument(format!("failed to serialize index meta: {e}")))?;
    txn.set(&key, &blob)?;
    Ok(())
}

pub fn load_indexes(
    txn: &impl KvTransaction,
    table_index_name: &[u8],
) -> Result<Vec<IndexMetadata>, EngineError> {
    let lo = meta_index_prefix(table_index_name);
    let hi = prefix_successor(&lo);
    let mut out = Vec::new();
    for entry in txn.range_scan(&lo, &hi, false)? {
        let (_, blob) = entry?;
        let meta: IndexMetadata = bson::deserialize_from_slice(&blob)
            .map_err(|e| EngineError::InvalidDocument(format!("invalid index meta: {e}")))?;
        out.push(meta);
    }
    Ok(out)
}

pub fn store_stats(
    txn: &impl KvTransaction,
    table_index_name: &[u8],
    index_id: u32,
    stats: &IndexStats,
) -> Result<(), EngineError> {
    let key = stats_key(table_index_name, index_id);
    let blob = bson::serialize_to_vec(stats)
        .map_err(|e| EngineError::InvalidDocument(format!("failed to serialize stats: {e}")))?;
    txn.set(&key, &blob)?;
    Ok(())
}

pub fn load_stats(
    txn: &impl KvTransaction,
    table_index_name: &[u8],
    index_id: u32,
) -> Result<IndexStats, EngineError> {
    let key = stats_key(table_index_name, index_id);
    match txn.get(&key)? {
        None => Ok(IndexStats::default()),
        Some(blob) => bson::deserialize_from_slice(&blob)
            .map_err(|e| EngineError::InvalidDocument(format!("invalid stats: {e}"))),
    }
}
