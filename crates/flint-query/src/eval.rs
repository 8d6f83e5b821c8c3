use std::cmp::Ordering;

use bson::Bson;
use bson::raw::{RawBsonRef, RawDocument};

use crate::expression::Expression;

/// Evaluate whether a raw document matches the given expression.
///
/// This is the residual filter: it re-checks candidates produced by a
/// lossy index range (truncated collation keys) and evaluates whole
/// predicates on primary-scan fallbacks. `$eq: null` matches both
/// explicit null and missing fields; array-valued fields match when
/// any element matches.
pub fn matches(doc: &RawDocument, expr: &Expression) -> bool {
    match expr {
        Expression::And(children) => children.iter().all(|c| matches(doc, c)),
        Expression::Or(children) => children.iter().any(|c| matches(doc, c)),
        Expression::Eq(field, value) => eq_matches(doc, field, value),
        Expression::Ne(field, value) => !eq_matches(doc, field, value),
        Expression::Gt(field, value) => cmp_matches(doc, field, value, |o| o == Ordering::Greater),
        Expression::Gte(field, value) => cmp_matches(doc, field, value, |o| o != Ordering::Less),
        Expression::Lt(field, value) => cmp_matches(doc, field, value, |o| o == Ordering::Less),
        Expression::Lte(field, value) => cmp_matches(doc, field, value, |o| o != Ordering::Greater),
    }
}

/// The first value at a dotted path, for sort-stage extraction.
pub fn field_value<'a>(doc: &'a RawDocument, path: &str) -> Option<RawBsonRef<'a>> {
    leaf_values(doc, path).into_iter().next()
}

/// Total order over optional document values for in-memory sorting:
/// missing and null first, then by type rank, then within type.
pub fn compare_values(a: Option<&RawBsonRef<'_>>, b: Option<&RawBsonRef<'_>>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(v)) => {
            if type_rank(v) == 0 {
                Ordering::Equal
            } else {
                Ordering::Less
            }
        }
        (Some(v), None) => compare_values(b, a).reverse(),
        (Some(a), Some(b)) => {
            let rank = type_rank(a).cmp(&type_rank(b));
            if rank != Ordering::Equal {
                return rank;
            }
            within_type_cmp(a, b)
        }
    }
}

fn type_rank(v: &RawBsonRef<'_>) -> u8 {
    match v {
        RawBsonRef::Null => 0,
        RawBsonRef::Boolean(_) => 1,
        RawBsonRef::Int32(_) | RawBsonRef::Int64(_) => 2,
        RawBsonRef::Double(_) => 3,
        RawBsonRef::DateTime(_) => 4,
        RawBsonRef::String(_) => 5,
        RawBsonRef::Binary(_) => 6,
        _ => 7,
    }
}

fn within_type_cmp(a: &RawBsonRef<'_>, b: &RawBsonRef<'_>) -> Ordering {
    use RawBsonRef::*;
    match (a, b) {
        (Boolean(x), Boolean(y)) => x.cmp(y),
        (Int32(x), Int32(y)) => x.cmp(y),
        (Int64(x), Int64(y)) => x.cmp(y),
        (Int32(x), Int64(y)) => (*x as i64).cmp(y),
        (Int64(x), Int32(y)) => x.cmp(&(*y as i64)),
        (Double(x), Double(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (DateTime(x), DateTime(y)) => x.timestamp_millis().cmp(&y.timestamp_millis()),
        (String(x), String(y)) => collation_cmp(x, y),
        (Binary(x), Binary(y)) => x.bytes.cmp(y.bytes),
        _ => Ordering::Equal,
    }
}

/// Locale-insensitive string comparison: case/accent-folded primary
/// weights, raw text as the tie-break: the same order the index
/// collation key produces.
fn collation_cmp(a: &str, b: &str) -> Ordering {
    let fold_a = deunicode::deunicode(a).to_lowercase();
    let fold_b = deunicode::deunicode(b).to_lowercase();
    fold_a.cmp(&fold_b).then_with(|| a.cmp(b))
}

// ── Path lookup ────────────────────────────────────────────────

/// All values at a dotted path, fanning out over array hops.
fn leaf_values<'a>(doc: &'a RawDocument, path: &str) -> Vec<RawBsonRef<'a>> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Ok(Some(value)) = doc.get(segments[0]) {
        collect(value, &segments[1..], &mut out);
    }
    out
}

fn collect<'a>(value: RawBsonRef<'a>, segments: &[&str], out: &mut Vec<RawBsonRef<'a>>) {
    if segments.is_empty() {
        out.push(value);
        return;
    }
    match value {
        RawBsonRef::Document(d) => {
            if let Ok(Some(v)) = d.get(segments[0]) {
                collect(v, &segments[1..], out);
            }
        }
        RawBsonRef::Array(arr) => {
            for elem in arr.into_iter().flatten() {
                collect(elem, segments, out);
            }
        }
        _ => {}
    }
}

// ── Comparison predicates ──────────────────────────────────────

fn eq_matches(doc: &RawDocument, field: &str, query: &Bson) -> bool {
    let values = leaf_values(doc, field);
    if matches!(query, Bson::Null) {
        // Missing field and explicit null are equally "null".
        return values.is_empty()
            || values.iter().any(|v| match v {
                RawBsonRef::Null => true,
                RawBsonRef::Array(arr) => arr
                    .into_iter()
                    .flatten()
                    .any(|e| matches!(e, RawBsonRef::Null)),
                _ => false,
            });
    }
    values.iter().any(|v| match v {
        RawBsonRef::Array(arr) => arr.into_iter().flatten().any(|e| value_eq(&e, query)),
        other => value_eq(other, query),
    })
}

fn cmp_matches(
    doc: &RawDocument,
    field: &str,
    query: &Bson,
    predicate: fn(Ordering) -> bool,
) -> bool {
    let values = leaf_values(doc, field);
    values.iter().any(|v| match v {
        RawBsonRef::Array(arr) => arr
            .into_iter()
            .flatten()
            .any(|e| value_cmp(&e, query).is_some_and(predicate)),
        other => value_cmp(other, query).is_some_and(predicate),
    })
}

/// Equality between a stored value and a query literal.
fn value_eq(store: &RawBsonRef<'_>, query: &Bson) -> bool {
    match (store, query) {
        (RawBsonRef::String(a), Bson::String(b)) => *a == b.as_str(),
        (RawBsonRef::Boolean(a), Bson::Boolean(b)) => a == b,
        (RawBsonRef::Int32(a), Bson::Int32(b)) => a == b,
        (RawBsonRef::Int32(a), Bson::Int64(b)) => (*a as i64) == *b,
        (RawBsonRef::Int64(a), Bson::Int64(b)) => a == b,
        (RawBsonRef::Int64(a), Bson::Int32(b)) => *a == (*b as i64),
        (RawBsonRef::Double(a), Bson::Double(b)) => a == b,
        (RawBsonRef::Double(a), Bson::Int32(b)) => *a == (*b as f64),
        (RawBsonRef::Double(a), Bson::Int64(b)) => *a == (*b as f64),
        (RawBsonRef::Int32(a), Bson::Double(b)) => (*a as f64) == *b,
        (RawBsonRef::Int64(a), Bson::Double(b)) => (*a as f64) == *b,
        (RawBsonRef::DateTime(a), Bson::DateTime(b)) => {
            a.timestamp_millis() == b.timestamp_millis()
        }
        (RawBsonRef::Binary(a), Bson::Binary(b)) => a.bytes == b.bytes.as_slice(),
        _ => false,
    }
}

/// Ordering between a stored value and a query literal; `None` for
/// incompatible types (the predicate then excludes the document).
fn value_cmp(store: &RawBsonRef<'_>, query: &Bson) -> Option<Ordering> {
    Some(match (store, query) {
        (RawBsonRef::String(a), Bson::String(b)) => collation_cmp(a, b),
        (RawBsonRef::Boolean(a), Bson::Boolean(b)) => a.cmp(b),
        (RawBsonRef::Int32(a), Bson::Int32(b)) => a.cmp(b),
        (RawBsonRef::Int32(a), Bson::Int64(b)) => (*a as i64).cmp(b),
        (RawBsonRef::Int64(a), Bson::Int64(b)) => a.cmp(b),
        (RawBsonRef::Int64(a), Bson::Int32(b)) => a.cmp(&(*b as i64)),
        (RawBsonRef::Double(a), Bson::Double(b)) => a.partial_cmp(b)?,
        (RawBsonRef::Double(a), Bson::Int32(b)) => a.partial_cmp(&(*b as f64))?,
        (RawBsonRef::Double(a), Bson::Int64(b)) => a.partial_cmp(&(*b as f64))?,
        (RawBsonRef::Int32(a), Bson::Double(b)) => (*a as f64).partial_cmp(b)?,
        (RawBsonRef::Int64(a), Bson::Double(b)) => (*a as f64).partial_cmp(b)?,
        (RawBsonRef::DateTime(a), Bson::DateTime(b)) => {
            a.timestamp_millis().cmp(&b.timestamp_millis())
        }
        (RawBsonRef::Binary(a), Bson::Binary(b)) => a.bytes.cmp(b.bytes.as_slice()),
        _ => return None,
    })
}
