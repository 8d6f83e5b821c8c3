use std::fmt;

use flint_store::StoreError;

use crate::metadata::IndexState;

#[derive(Debug)]
pub enum EngineError {
    Store(StoreError),
    /// A value the order-preserving codec cannot represent (NaN double,
    /// unsupported type, nesting past the depth bound).
    Codec(String),
    /// Document field type disagrees with the schema. Never coerced.
    SchemaMismatch(String),
    InvalidDocument(String),
    InvalidSchema(String),
    IndexNotFound(u32),
    InvalidStateTransition {
        from: IndexState,
        to: IndexState,
    },
    Cancelled,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Codec(msg) => write!(f, "codec error: {msg}"),
            Self::SchemaMismatch(msg) => write!(f, "schema mismatch: {msg}"),
            Self::InvalidDocument(msg) => write!(f, "invalid document: {msg}"),
            Self::InvalidSchema(msg) => write!(f, "invalid schema: {msg}"),
            Self::IndexNotFound(id) => write!(f, "index not found: {id}"),
            Self::InvalidStateTransition { from, to } => {
                write!(f, "invalid index state transition: {from:?} -> {to:?}")
            }
            Self::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Cancelled => Self::Cancelled,
            other => Self::Store(other),
        }
    }
}
