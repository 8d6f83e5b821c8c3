mod build;
mod config;
mod encoding;
mod error;
mod keyset;
mod maintain;
mod metadata;
mod schema;
mod walker;

pub use build::{CancelToken, IndexBuilder};
pub use config::IndexingOptions;
pub use encoding::key::{
    self as key, IndexKeyParts, DATA_SUBSPACE, INDEX_SUBSPACE, META_SUBSPACE,
};
pub use encoding::value::{canonical_datetime, datetime_from_millis, IndexValue, ValueTag};
pub use error::EngineError;
pub use keyset::{KeySet, KeySetDelta};
pub use maintain::{IndexInfo, Maintainer};
pub use metadata::{
    load_indexes, load_stats, store_index, store_stats, CollectionHandle, IndexMetadata,
    IndexState, IndexStats,
};
pub use schema::{CollectionSchema, FieldSchema, FieldType};
pub use walker::{
    DocumentLeaf, LeafWalker, ARRAY_STUB_SEGMENT, CREATED_AT_FIELD, UPDATED_AT_FIELD,
};
