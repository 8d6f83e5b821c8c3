use std::fmt;

use flint_engine::EngineError;
use flint_query::FilterParseError;
use flint_store::StoreError;

#[derive(Debug)]
pub enum DbError {
    Engine(EngineError),
    Store(StoreError),
    Filter(FilterParseError),
    CollectionNotFound(String),
    DuplicateKey(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Engine(e) => write!(f, "engine error: {e}"),
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Filter(e) => write!(f, "{e}"),
            Self::CollectionNotFound(name) => write!(f, "collection not found: {name}"),
            Self::DuplicateKey(id) => write!(f, "duplicate key: {id}"),
        }
    }
}

impl std::error::Error for DbError {}

impl From<EngineError> for DbError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl From<StoreError> for DbError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<FilterParseError> for DbError {
    fn from(e: FilterParseError) -> Self {
        Self::Filter(e)
    }
}
