mod common;
use common::*;

use bson::doc;
use flint_db::{READ_PRIMARY, READ_SECONDARY};
use flint_engine::IndexState;
use serde_json::json;

fn unindexed_schema() -> serde_json::Value {
    json!({
        "title": COLLECTION,
        "primary_key": ["pkey_int"],
        "properties": {
            "pkey_int": { "type": "integer" },
            "int_value": { "type": "integer" }
        }
    })
}

fn all_indexed_schema() -> serde_json::Value {
    json!({
        "title": COLLECTION,
        "primary_key": ["pkey_int"],
        "properties": {
            "pkey_int": { "type": "integer", "index": true },
            "int_value": { "type": "integer", "index": true }
        }
    })
}

// ── Online build over a pre-existing collection ─────────────────

#[test]
fn build_activates_index_over_existing_data() {
    init_tracing();
    let db = test_db();
    db.create_collection(&unindexed_schema()).unwrap();

    let docs: Vec<bson::Document> = (0..1000)
        .map(|n| doc! { "pkey_int": n, "int_value": n })
        .collect();
    db.insert(COLLECTION, docs).unwrap();

    // Nothing is indexed yet: queries take the primary path.
    let explain = db
        .explain(COLLECTION, &doc! { "int_value": { "$gt": null } }, &[])
        .unwrap();
    assert_eq!(explain.read_type, READ_PRIMARY);
    assert_eq!(explain.reason.as_deref(), None);

    // Mark everything indexed and build.
    db.update_schema(&all_indexed_schema()).unwrap();
    let indexes = db.build_collection(COLLECTION).unwrap();
    assert!(indexes.iter().all(|ix| ix.state == IndexState::Active));

    let filter = doc! { "int_value": { "$gt": null } };
    let explain = db.explain(COLLECTION, &filter, &[]).unwrap();
    assert_eq!(explain.read_type, READ_SECONDARY);

    let docs = db.find(COLLECTION, &filter, &[]).unwrap();
    assert_eq!(docs.len(), 1000);

    // 4 leaves per document: pkey_int, int_value, two timestamps.
    let info = db.index_info(COLLECTION, 1).unwrap();
    assert_eq!(info.rows, 4000);
    assert_eq!(info.state, IndexState::Active);
}

#[test]
fn queries_before_build_report_unbuilt_index() {
    let db = test_db();
    db.create_collection(&unindexed_schema()).unwrap();
    db.insert(COLLECTION, vec![doc! { "pkey_int": 1, "int_value": 5 }])
        .unwrap();
    db.update_schema(&all_indexed_schema()).unwrap();

    // The schema marks the field indexed but the index has not been
    // built: the planner falls back and says why.
    let explain = db
        .explain(COLLECTION, &doc! { "int_value": 5 }, &[])
        .unwrap();
    assert_eq!(explain.read_type, READ_PRIMARY);
    assert_eq!(explain.reason.as_deref(), Some("index not built"));

    // Results still come back, via the primary scan.
    let docs = db.find(COLLECTION, &doc! { "int_value": 5 }, &[]).unwrap();
    assert_eq!(pkeys(&docs), vec![1]);
}

#[test]
fn writes_after_build_keep_index_current() {
    let db = test_db();
    db.create_collection(&unindexed_schema()).unwrap();
    db.insert(
        COLLECTION,
        (0..10).map(|n| doc! { "pkey_int": n, "int_value": n }).collect(),
    )
    .unwrap();
    db.update_schema(&all_indexed_schema()).unwrap();
    db.build_collection(COLLECTION).unwrap();

    db.insert(COLLECTION, vec![doc! { "pkey_int": 10, "int_value": 10 }])
        .unwrap();
    let docs = db.find(COLLECTION, &doc! { "int_value": 10 }, &[]).unwrap();
    assert_eq!(pkeys(&docs), vec![10]);

    let info = db.index_info(COLLECTION, 1).unwrap();
    assert_eq!(info.rows, 44);
}

#[test]
fn drop_index_clears_subspace_and_falls_back() {
    let db = test_db();
    seed_five(&db);

    let before = db.index_info(COLLECTION, 1).unwrap();
    assert!(before.rows > 0);

    let removed = db.drop_index(COLLECTION, 1).unwrap();
    assert_eq!(removed, before.rows);

    let info = db.index_info(COLLECTION, 1).unwrap();
    assert_eq!(info.rows, 0);
    assert_eq!(info.state, IndexState::Deleted);

    // Queries still answer, via the primary path.
    let filter = doc! { "int_value": 10 };
    let explain = db.explain(COLLECTION, &filter, &[]).unwrap();
    assert_eq!(explain.read_type, READ_PRIMARY);
    let docs = db.find(COLLECTION, &filter, &[]).unwrap();
    assert_eq!(pkeys(&docs), vec![1]);
}
