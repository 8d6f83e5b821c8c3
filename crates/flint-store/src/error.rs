use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Storage(String),
    ReadOnly,
    TransactionConsumed,
    /// Another transaction committed a conflicting write.
    Conflict,
    /// The transaction exceeded the engine's size ceiling.
    TooLarge,
    Cancelled,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(msg) => write!(f, "storage error: {msg}"),
            Self::ReadOnly => write!(f, "write on read-only transaction"),
            Self::TransactionConsumed => write!(f, "transaction already consumed"),
            Self::Conflict => write!(f, "transaction conflict"),
            Self::TooLarge => write!(f, "transaction too large"),
            Self::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for StoreError {}
