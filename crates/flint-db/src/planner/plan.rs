use bson::Bson;
use flint_query::{Expression, Sort};

/// Human-readable sentinel for an open low range end. Appears only in
/// EXPLAIN output, never on disk.
pub const NULL_SENTINEL: &str = "null";
/// Human-readable sentinel for an open high range end.
pub const MAX_SENTINEL: &str = "$TIGRIS_MAX";

pub const READ_SECONDARY: &str = "secondary index";
pub const READ_PRIMARY: &str = "primary";

/// Scan direction for index scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Forward,
    Reverse,
}

/// Describes how one field's index scan is bounded.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanRange {
    /// All entries for the field.
    Full,
    /// Exact value match.
    Eq(Bson),
    /// Range with optional (value, inclusive) bounds.
    Range {
        lower: Option<(Bson, bool)>,
        upper: Option<(Bson, bool)>,
    },
}

/// One planned key range over the index subspace.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRange {
    pub field: String,
    pub range: ScanRange,
}

/// How the executor reads candidate documents.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadPlan {
    /// One or more index ranges; multiple ranges union their results.
    SecondaryIndex {
        ranges: Vec<IndexRange>,
        direction: ScanDirection,
    },
    /// Full scan of the primary data subspace.
    PrimaryScan,
}

/// Read-only query introspection surface.
#[derive(Debug, Clone, PartialEq)]
pub struct Explain {
    pub read_type: &'static str,
    pub field: Option<String>,
    /// `[value]` for point lookups, `[low, high]` for ranges, with the
    /// `null` / `$TIGRIS_MAX` sentinels for open ends.
    pub key_range: Vec<String>,
    /// Why an index was not used (e.g. the index is still building).
    pub reason: Option<String>,
}

/// A compiled query: the physical read, the residual post-filter, and
/// an optional in-memory sort stage (absent when the scan direction
/// already delivers the requested order).
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub read: ReadPlan,
    pub residual: Option<Expression>,
    pub sort: Option<Vec<Sort>>,
    pub explain: Explain,
}

/// Render a query literal the way EXPLAIN prints bounds.
pub(crate) fn bson_literal(value: &Bson) -> String {
    match value {
        Bson::Null => NULL_SENTINEL.to_string(),
        Bson::Boolean(b) => b.to_string(),
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        Bson::Double(f) => f.to_string(),
        Bson::String(s) => s.clone(),
        Bson::DateTime(dt) => dt
            .try_to_rfc3339_string()
            .unwrap_or_else(|_| dt.timestamp_millis().to_string()),
        other => other.to_string(),
    }
}
