use std::cmp::Ordering;
use std::collections::HashSet;

use bson::raw::RawDocumentBuf;
use flint_engine::{key, CollectionHandle, EngineError, IndexValue, IndexingOptions, ValueTag};
use flint_query::SortDirection;
use flint_store::KvTransaction;

use crate::error::DbError;
use crate::planner::plan::{IndexRange, QueryPlan, ReadPlan, ScanDirection, ScanRange};

/// One matched document with its decoded primary key.
pub(crate) struct Row {
    pub pk: Vec<IndexValue>,
    pub doc: RawDocumentBuf,
}

/// Run a compiled plan: scan, dedupe, fetch, residual-filter, sort.
pub(crate) fn execute<T: KvTransaction>(
    txn: &T,
    handle: &CollectionHandle,
    options: &IndexingOptions,
    plan: &QueryPlan,
) -> Result<Vec<Row>, DbError> {
    let mut rows = match &plan.read {
        ReadPlan::PrimaryScan => scan_primary(txn, handle)?,
        ReadPlan::SecondaryIndex { ranges, direction } => {
            let mut seen: HashSet<Vec<u8>> = HashSet::new();
            let mut rows = Vec::new();
            for range in ranges {
                scan_index_range(txn, handle, options, range, *direction, &mut seen, &mut rows)?;
            }
            rows
        }
    };

    if let Some(residual) = &plan.residual {
        rows.retain(|row| flint_query::matches(&row.doc, residual));
    }

    if let Some(sorts) = &plan.sort {
        rows.sort_by(|a, b| {
            for sort in sorts {
                let left = flint_query::field_value(&a.doc, &sort.field);
                let right = flint_query::field_value(&b.doc, &sort.field);
                let ord = match sort.direction {
                    SortDirection::Asc => flint_query::compare_values(left.as_ref(), right.as_ref()),
                    SortDirection::Desc => {
                        flint_query::compare_values(left.as_ref(), right.as_ref()).reverse()
                    }
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    Ok(rows)
}

fn scan_primary<T: KvTransaction>(
    txn: &T,
    handle: &CollectionHandle,
) -> Result<Vec<Row>, DbError> {
    let lo = key::data_prefix(&handle.table_index_name);
    let hi = key::prefix_successor(&lo);
    let mut rows = Vec::new();
    for entry in txn.range_scan(&lo, &hi, false)? {
        let (data_key, bytes) = entry?;
        let pk = key::parse_data_key(&data_key).ok_or_else(|| {
            DbError::Engine(EngineError::Codec("malformed data key".into()))
        })?;
        let doc = RawDocumentBuf::from_bytes(bytes)
            .map_err(|e| DbError::Engine(EngineError::InvalidDocument(e.to_string())))?;
        rows.push(Row { pk, doc });
    }
    Ok(rows)
}

/// Scan one index range, collecting documents for primary keys not
/// already seen (array leaves produce one entry per element, so a
/// document can surface several times inside one range).
fn scan_index_range<T: KvTransaction>(
    txn: &T,
    handle: &CollectionHandle,
    options: &IndexingOptions,
    range: &IndexRange,
    direction: ScanDirection,
    seen: &mut HashSet<Vec<u8>>,
    rows: &mut Vec<Row>,
) -> Result<(), DbError> {
    let (lo, hi) = range_bounds(handle, options, range)?;
    let reverse = direction == ScanDirection::Reverse;

    for entry in txn.range_scan(&lo, &hi, reverse)? {
        let (entry_key, _) = entry?;
        let parts = key::index_parts(&entry_key).ok_or_else(|| {
            DbError::Engine(EngineError::Codec("malformed index key".into()))
        })?;
        let data_key = key::data_key(&handle.table_index_name, &parts.primary_key)?;
        if !seen.insert(data_key.clone()) {
            continue;
        }
        match txn.get(&data_key)? {
            Some(bytes) => {
                let doc = RawDocumentBuf::from_bytes(bytes)
                    .map_err(|e| DbError::Engine(EngineError::InvalidDocument(e.to_string())))?;
                rows.push(Row {
                    pk: parts.primary_key,
                    doc,
                });
            }
            None => {
                // An entry pointing at no row means the bijection
                // broke; surface it rather than silently dropping.
                tracing::warn!(field = %range.field, "dangling index entry");
            }
        }
    }
    Ok(())
}

/// Translate a value-level range into `[lo, hi)` key bytes.
///
/// A missing bound opens to the field subspace edge, except that a
/// typed bound clamps the open side to that type's subspace: a range
/// over ints never walks into string entries. Null bounds are the
/// exception: `> null` spans every non-null type (the "field present"
/// probe).
fn range_bounds(
    handle: &CollectionHandle,
    options: &IndexingOptions,
    range: &IndexRange,
) -> Result<(Vec<u8>, Vec<u8>), DbError> {
    let tin = &handle.table_index_name;
    let field = range.field.as_str();
    let ty = handle.schema.leaf_type(field);
    let field_lo = key::field_prefix(tin, field);
    let field_hi = key::prefix_successor(&field_lo);

    let convert = |v: &bson::Bson| -> Result<IndexValue, DbError> {
        IndexValue::from_bson(ty, v).ok_or_else(|| {
            DbError::Engine(EngineError::Codec(format!(
                "unsupported query literal for '{field}'"
            )))
        })
    };

    match &range.range {
        ScanRange::Full => Ok((field_lo, field_hi)),
        ScanRange::Eq(v) => {
            let value = convert(v)?;
            let prefix = key::value_prefix(tin, field, &value, options.string_key_max_bytes)?;
            let hi = key::prefix_successor(&prefix);
            Ok((prefix, hi))
        }
        ScanRange::Range { lower, upper } => {
            let lower_value = lower.as_ref().map(|(v, i)| Ok::<_, DbError>((convert(v)?, *i))).transpose()?;
            let upper_value = upper.as_ref().map(|(v, i)| Ok::<_, DbError>((convert(v)?, *i))).transpose()?;

            let lo = match &lower_value {
                Some((IndexValue::Null, inclusive)) => {
                    if *inclusive {
                        field_lo.clone()
                    } else {
                        key::prefix_successor(&key::type_prefix(tin, field, ValueTag::Null))
                    }
                }
                Some((value, inclusive)) => {
                    let prefix =
                        key::value_prefix(tin, field, value, options.string_key_max_bytes)?;
                    if *inclusive {
                        prefix
                    } else {
                        key::prefix_successor(&prefix)
                    }
                }
                None => match &upper_value {
                    Some((value, _)) if value.tag() != ValueTag::Null => {
                        key::type_prefix(tin, field, value.tag())
                    }
                    _ => field_lo.clone(),
                },
            };

            let hi = match &upper_value {
                Some((IndexValue::Null, inclusive)) => {
                    let null_lo = key::type_prefix(tin, field, ValueTag::Null);
                    if *inclusive {
                        key::prefix_successor(&null_lo)
                    } else {
                        null_lo
                    }
                }
                Some((value, inclusive)) => {
                    let prefix =
                        key::value_prefix(tin, field, value, options.string_key_max_bytes)?;
                    if *inclusive {
                        key::prefix_successor(&prefix)
                    } else {
                        prefix
                    }
                }
                None => match &lower_value {
                    Some((value, _)) if value.tag() != ValueTag::Null => {
                        key::prefix_successor(&key::type_prefix(tin, field, value.tag()))
                    }
                    _ => field_hi.clone(),
                },
            };

            Ok((lo, hi))
        }
    }
}
