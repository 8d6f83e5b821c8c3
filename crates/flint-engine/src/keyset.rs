use std::collections::{HashMap, HashSet};

use bson::raw::RawDocument;

use crate::config::IndexingOptions;
use crate::encoding::key::index_key;
use crate::encoding::value::write_value;
use crate::error::EngineError;
use crate::schema::CollectionSchema;
use crate::walker::LeafWalker;
use crate::IndexValue;

/// The multiset of index keys derived from one document for one index,
/// plus per-field occurrence counts.
///
/// Keys are unique (the `array_pos` and primary-key suffixes
/// disambiguate), so the counts are not stored; they exist to verify
/// the entry-per-leaf bijection in tests and update plans.
#[derive(Debug, Clone)]
pub struct KeySet {
    keys: Vec<Vec<u8>>,
    counts: HashMap<(String, Vec<u8>), u32>,
}

impl PartialEq for KeySet {
    fn eq(&self, other: &Self) -> bool {
        self.keys == other.keys
    }
}

/// The adds/removes needed to move the stored entries from one
/// `KeySet` to another.
#[derive(Debug, Default)]
pub struct KeySetDelta {
    pub adds: Vec<Vec<u8>>,
    pub removes: Vec<Vec<u8>>,
}

impl KeySet {
    /// Derive the key set for `doc` under `index_id`.
    pub fn build(
        schema: &CollectionSchema,
        options: &IndexingOptions,
        table_index_name: &[u8],
        index_id: u32,
        doc: &RawDocument,
        primary_key: &[IndexValue],
    ) -> Result<KeySet, EngineError> {
        let mut keys = Vec::new();
        let mut counts: HashMap<(String, Vec<u8>), u32> = HashMap::new();

        let walker = LeafWalker::new(schema, doc, options.index_all, options.max_document_depth)?;
        for leaf in walker {
            let leaf = leaf?;
            let (key, _truncated) = index_key(
                table_index_name,
                &leaf.path,
                &leaf.value,
                leaf.array_pos,
                index_id,
                primary_key,
                options.string_key_max_bytes,
            )?;
            keys.push(key);

            let mut encoded = Vec::new();
            write_value(&mut encoded, &leaf.value, options.string_key_max_bytes)?;
            *counts.entry((leaf.path, encoded)).or_insert(0) += 1;
        }

        Ok(KeySet { keys, counts })
    }

    pub fn empty() -> KeySet {
        KeySet {
            keys: Vec::new(),
            counts: HashMap::new(),
        }
    }

    pub fn keys(&self) -> &[Vec<u8>] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Occurrences of one `(field_path, value)` pair across the
    /// document (greater than one only through array semantics).
    pub fn count(&self, path: &str, encoded_value: &[u8]) -> u32 {
        self.counts
            .get(&(path.to_string(), encoded_value.to_vec()))
            .copied()
            .unwrap_or(0)
    }

    /// Set difference against the previous key set: keys only in
    /// `self` become adds, keys only in `old` become removes, common
    /// keys are untouched.
    pub fn diff(&self, old: &KeySet) -> KeySetDelta {
        let old_keys: HashSet<&[u8]> = old.keys.iter().map(Vec::as_slice).collect();
        let new_keys: HashSet<&[u8]> = self.keys.iter().map(Vec::as_slice).collect();

        let adds = self
            .keys
            .iter()
            .filter(|k| !old_keys.contains(k.as_slice()))
            .cloned()
            .collect();
        let removes = old
            .keys
            .iter()
            .filter(|k| !new_keys.contains(k.as_slice()))
            .cloned()
            .collect();

        KeySetDelta { adds, removes }
    }
}
