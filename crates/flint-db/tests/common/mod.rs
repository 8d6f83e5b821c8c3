#![allow(dead_code)]

use bson::doc;
use bson::raw::{RawBsonRef, RawDocumentBuf};
use flint_db::Database;
use flint_store::MemoryStore;
use serde_json::json;

pub const COLLECTION: &str = "accounts";

/// Capture builder progress logs in test output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn test_db() -> Database<MemoryStore> {
    Database::new(MemoryStore::new()).with_clock(|| 1_700_000_000_000)
}

/// Schema with every scalar field indexed.
pub fn indexed_schema() -> serde_json::Value {
    json!({
        "title": COLLECTION,
        "primary_key": ["pkey_int"],
        "properties": {
            "pkey_int": { "type": "integer", "index": true },
            "int_value": { "type": "integer", "index": true },
            "string_value": { "type": "string", "index": true },
            "bool_value": { "type": "boolean", "index": true },
            "double_value": { "type": "number", "index": true },
            "tags": { "type": "array", "items": { "type": "string" }, "index": true }
        }
    })
}

/// Insert the five seed documents used across the read-path suites.
pub fn seed_five(db: &Database<MemoryStore>) {
    db.create_collection(&indexed_schema()).unwrap();
    db.insert(
        COLLECTION,
        vec![
            doc! { "pkey_int": 1, "int_value": 10, "string_value": "alpha", "bool_value": true, "double_value": 10.5 },
            doc! { "pkey_int": 2, "int_value": 1, "string_value": "bravo", "bool_value": false, "double_value": 1.5 },
            doc! { "pkey_int": 3, "int_value": 100, "string_value": "charlie", "bool_value": false, "double_value": 100.5 },
            doc! { "pkey_int": 4, "int_value": 5, "string_value": "delta", "bool_value": true, "double_value": 5.5 },
            doc! { "pkey_int": 30, "int_value": 30, "string_value": "echo", "bool_value": false, "double_value": 30.5 },
        ],
    )
    .unwrap();
}

pub fn pkeys(docs: &[RawDocumentBuf]) -> Vec<i64> {
    docs.iter()
        .map(|d| match d.get("pkey_int").unwrap().unwrap() {
            RawBsonRef::Int32(n) => n as i64,
            RawBsonRef::Int64(n) => n,
            other => panic!("unexpected pkey type: {other:?}"),
        })
        .collect()
}
