use crate::error::EngineError;
use crate::encoding::value::{
    read_escaped, read_value, write_escaped, write_value, IndexValue, ValueTag,
};

/// Constant marker distinguishing secondary-index keys from data keys.
pub const INDEX_SUBSPACE: &[u8] = b"skey";
/// Primary collection data.
pub const DATA_SUBSPACE: &[u8] = b"dkey";
/// Index metadata and counters.
pub const META_SUBSPACE: &[u8] = b"mkey";

const META_INDEX_SEGMENT: &[u8] = b"index";
const META_STATS_SEGMENT: &[u8] = b"stats";

// ── Tuple elements ──────────────────────────────────────────────
//
// Every key is a concatenation of self-delimiting elements, each
// starting with a type-order tag. Identifier segments (subspace tags,
// table index names, field paths) are byte-string elements; ordinals
// are int elements; leaf values and primary-key parts are typed
// value elements.

fn write_bytes_element(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.push(ValueTag::Bytes as u8);
    write_escaped(buf, bytes);
}

fn write_int_element(buf: &mut Vec<u8>, n: i64) {
    // Int elements never fail to encode.
    let _ = write_value(buf, &IndexValue::Int(n), 0);
}

fn read_bytes_element(bytes: &[u8], pos: usize) -> Option<(Vec<u8>, usize)> {
    if *bytes.get(pos)? != ValueTag::Bytes as u8 {
        return None;
    }
    read_escaped(bytes, pos + 1)
}

fn read_int_element(bytes: &[u8], pos: usize) -> Option<(i64, usize)> {
    match read_value(bytes, pos)? {
        (IndexValue::Int(n), next) => Some((n, next)),
        _ => None,
    }
}

/// Encode one primary-key part. Strings and byte-strings both encode
/// as raw byte-string elements so the part survives decoding losslessly
/// (collation keys are lossy past the truncation bound; primary keys
/// must round-trip to address the document row).
pub fn write_pk_part(buf: &mut Vec<u8>, part: &IndexValue) -> Result<(), EngineError> {
    match part {
        IndexValue::String(s) => {
            write_bytes_element(buf, s.as_bytes());
            Ok(())
        }
        other => write_value(buf, other, 0).map(|_| ()),
    }
}

// ── Index keys ─────────────────────────────────────────────────

/// Build a full index entry key:
/// `("skey", table_index_name, field_path, value, array_pos, index_id, pk…)`.
///
/// Returns the key and whether the value's collation key was
/// truncated (the planner attaches a residual filter when it was).
pub fn index_key(
    table_index_name: &[u8],
    field_path: &str,
    value: &IndexValue,
    array_pos: u32,
    index_id: u32,
    primary_key: &[IndexValue],
    string_key_max: usize,
) -> Result<(Vec<u8>, bool), EngineError> {
    let mut buf = field_prefix(table_index_name, field_path);
    let truncated = write_value(&mut buf, value, string_key_max)?;
    write_int_element(&mut buf, array_pos as i64);
    write_int_element(&mut buf, index_id as i64);
    for part in primary_key {
        write_pk_part(&mut buf, part)?;
    }
    Ok((buf, truncated))
}

/// `("skey", table_index_name)`: the whole secondary-index subspace
/// of one collection.
pub fn index_subspace_prefix(table_index_name: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + INDEX_SUBSPACE.len() + 2 + table_index_name.len() + 2);
    write_bytes_element(&mut buf, INDEX_SUBSPACE);
    write_bytes_element(&mut buf, table_index_name);
    buf
}

/// `("skey", table_index_name, field_path)`: all entries for one
/// field, across every value type.
pub fn field_prefix(table_index_name: &[u8], field_path: &str) -> Vec<u8> {
    let mut buf = index_subspace_prefix(table_index_name);
    write_bytes_element(&mut buf, field_path.as_bytes());
    buf
}

/// Field prefix narrowed to a single type-order tag.
pub fn type_prefix(table_index_name: &[u8], field_path: &str, tag: ValueTag) -> Vec<u8> {
    let mut buf = field_prefix(table_index_name, field_path);
    buf.push(tag as u8);
    buf
}

/// Field prefix narrowed to one encoded value (point lookups).
pub fn value_prefix(
    table_index_name: &[u8],
    field_path: &str,
    value: &IndexValue,
    string_key_max: usize,
) -> Result<Vec<u8>, EngineError> {
    let mut buf = field_prefix(table_index_name, field_path);
    write_value(&mut buf, value, string_key_max)?;
    Ok(buf)
}

/// First key strictly after every key with the given prefix.
pub fn prefix_successor(prefix: &[u8]) -> Vec<u8> {
    let mut out = prefix.to_vec();
    while let Some(&last) = out.last() {
        if last == 0xff {
            out.pop();
        } else {
            *out.last_mut().unwrap() = last + 1;
            return out;
        }
    }
    debug_assert!(false, "prefix was all 0xff");
    vec![0xff]
}

// ── Decoded key parts ──────────────────────────────────────────

/// Decoded view of an index entry key, exposed for EXPLAIN output and
/// test introspection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexKeyParts {
    pub table_index_name: Vec<u8>,
    pub field_path: String,
    pub value: IndexValue,
    pub array_pos: u32,
    pub index_id: u32,
    pub primary_key: Vec<IndexValue>,
}

/// Parse an index entry key back into its tuple parts.
pub fn index_parts(key: &[u8]) -> Option<IndexKeyParts> {
    let (subspace, pos) = read_bytes_element(key, 0)?;
    if subspace != INDEX_SUBSPACE {
        return None;
    }
    let (table_index_name, pos) = read_bytes_element(key, pos)?;
    let (path_bytes, pos) = read_bytes_element(key, pos)?;
    let field_path = String::from_utf8(path_bytes).ok()?;
    let (value, pos) = read_value(key, pos)?;
    let (array_pos, pos) = read_int_element(key, pos)?;
    let (index_id, mut pos) = read_int_element(key, pos)?;

    let mut primary_key = Vec::new();
    while pos < key.len() {
        let (part, next) = read_value(key, pos)?;
        primary_key.push(part);
        pos = next;
    }

    Some(IndexKeyParts {
        table_index_name,
        field_path,
        value,
        array_pos: u32::try_from(array_pos).ok()?,
        index_id: u32::try_from(index_id).ok()?,
        primary_key,
    })
}

// ── Primary data keys ──────────────────────────────────────────

/// `("dkey", table_index_name, pk…)`: the primary row for a document.
pub fn data_key(
    table_index_name: &[u8],
    primary_key: &[IndexValue],
) -> Result<Vec<u8>, EngineError> {
    let mut buf = data_prefix(table_index_name);
    for part in primary_key {
        write_pk_part(&mut buf, part)?;
    }
    Ok(buf)
}

pub fn data_prefix(table_index_name: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + DATA_SUBSPACE.len() + 2 + table_index_name.len() + 2);
    write_bytes_element(&mut buf, DATA_SUBSPACE);
    write_bytes_element(&mut buf, table_index_name);
    buf
}

/// Recover the primary-key tuple from a data key.
pub fn parse_data_key(key: &[u8]) -> Option<Vec<IndexValue>> {
    let (subspace, pos) = read_bytes_element(key, 0)?;
    if subspace != DATA_SUBSPACE {
        return None;
    }
    let (_, mut pos) = read_bytes_element(key, pos)?;
    let mut parts = Vec::new();
    while pos < key.len() {
        let (part, next) = read_value(key, pos)?;
        parts.push(part);
        pos = next;
    }
    Some(parts)
}

// ── Metadata keys ──────────────────────────────────────────────

/// `("mkey", table_index_name, "index", index_id)`: index metadata.
pub fn meta_index_key(table_index_name: &[u8], index_id: u32) -> Vec<u8> {
    let mut buf = meta_index_prefix(table_index_name);
    write_int_element(&mut buf, index_id as i64);
    buf
}

pub fn meta_index_prefix(table_index_name: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    write_bytes_element(&mut buf, META_SUBSPACE);
    write_bytes_element(&mut buf, table_index_name);
    write_bytes_element(&mut buf, META_INDEX_SEGMENT);
    buf
}

/// `("mkey", table_index_name, "stats", index_id)`: row/size counters.
pub fn stats_key(table_index_name: &[u8], index_id: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    write_bytes_element(&mut buf, META_SUBSPACE);
    write_bytes_element(&mut buf, table_index_name);
    write_bytes_element(&mut buf, META_STATS_SEGMENT);
    write_int_element(&mut buf, index_id as i64);
    buf
}
