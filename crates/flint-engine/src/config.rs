use serde::Deserialize;

/// Recognised indexing options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexingOptions {
    /// Index every schema leaf instead of only fields annotated `index: true`.
    pub index_all: bool,
    /// Collation-key truncation bound for string values.
    pub string_key_max_bytes: usize,
    /// Per-batch row budget for the online builder.
    pub build_batch_rows: usize,
    /// Per-batch byte budget for the online builder.
    pub build_batch_bytes: usize,
    /// Per-batch deadline for the online builder, in milliseconds.
    pub build_batch_deadline_ms: u64,
    /// Walker work-stack depth bound.
    pub max_document_depth: usize,
}

impl Default for IndexingOptions {
    fn default() -> Self {
        Self {
            index_all: false,
            string_key_max_bytes: 64,
            build_batch_rows: 1000,
            build_batch_bytes: 1 << 20,
            build_batch_deadline_ms: 5_000,
            max_document_depth: 32,
        }
    }
}
