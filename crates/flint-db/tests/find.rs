mod common;
use common::*;

use bson::doc;
use flint_db::{MAX_SENTINEL, NULL_SENTINEL, READ_PRIMARY, READ_SECONDARY};
use flint_query::Sort;

// ── Read path over the secondary index ──────────────────────────

#[test]
fn equality_on_int_field() {
    let db = test_db();
    seed_five(&db);

    let docs = db.find(COLLECTION, &doc! { "int_value": 10 }, &[]).unwrap();
    assert_eq!(pkeys(&docs), vec![1]);

    let explain = db.explain(COLLECTION, &doc! { "int_value": 10 }, &[]).unwrap();
    assert_eq!(explain.read_type, READ_SECONDARY);
    assert_eq!(explain.field.as_deref(), Some("int_value"));
    assert_eq!(explain.key_range, vec!["10"]);
}

#[test]
fn range_with_descending_sort() {
    let db = test_db();
    seed_five(&db);

    let filter = doc! { "int_value": { "$gt": 0 } };
    let sort = [Sort::desc("int_value")];
    let docs = db.find(COLLECTION, &filter, &sort).unwrap();
    assert_eq!(pkeys(&docs), vec![3, 30, 1, 4, 2]);

    let explain = db.explain(COLLECTION, &filter, &sort).unwrap();
    assert_eq!(explain.read_type, READ_SECONDARY);
    assert_eq!(explain.key_range, vec!["0", MAX_SENTINEL]);
}

#[test]
fn range_with_ascending_sort() {
    let db = test_db();
    seed_five(&db);

    let docs = db
        .find(
            COLLECTION,
            &doc! { "int_value": { "$gt": 0 } },
            &[Sort::asc("int_value")],
        )
        .unwrap();
    assert_eq!(pkeys(&docs), vec![2, 4, 1, 30, 3]);
}

#[test]
fn boolean_range() {
    let db = test_db();
    seed_five(&db);

    let filter = doc! { "bool_value": { "$lte": false } };
    let docs = db.find(COLLECTION, &filter, &[]).unwrap();
    assert_eq!(pkeys(&docs), vec![2, 3, 30]);

    let explain = db.explain(COLLECTION, &filter, &[]).unwrap();
    assert_eq!(explain.read_type, READ_SECONDARY);
    assert_eq!(explain.key_range, vec![NULL_SENTINEL, "false"]);
}

#[test]
fn bounded_range_returns_interior() {
    let db = test_db();
    seed_five(&db);

    let docs = db
        .find(
            COLLECTION,
            &doc! { "int_value": { "$gte": 5, "$lt": 100 } },
            &[Sort::asc("int_value")],
        )
        .unwrap();
    assert_eq!(pkeys(&docs), vec![4, 1, 30]);
}

#[test]
fn long_string_equality_uses_residual() {
    let db = test_db();
    seed_five(&db);

    // Two 100-byte strings sharing a prefix longer than the 64-byte
    // collation key bound: their index entries collide, so only the
    // residual filter separates them.
    let shared = "p".repeat(90);
    let a = format!("{shared}-aaaaa");
    let b = format!("{shared}-bbbbb");
    db.insert(
        COLLECTION,
        vec![
            doc! { "pkey_int": 100, "string_value": a.clone() },
            doc! { "pkey_int": 101, "string_value": b.clone() },
        ],
    )
    .unwrap();

    let filter = doc! { "string_value": { "$eq": a.clone() } };
    let docs = db.find(COLLECTION, &filter, &[]).unwrap();
    assert_eq!(pkeys(&docs), vec![100]);

    let explain = db.explain(COLLECTION, &filter, &[]).unwrap();
    assert_eq!(explain.read_type, READ_SECONDARY);
}

#[test]
fn string_equality_is_exact_on_case() {
    let db = test_db();
    seed_five(&db);

    // "Alpha" and "alpha" share a collation key prefix; equality must
    // stay raw-exact.
    db.insert(COLLECTION, vec![doc! { "pkey_int": 7, "string_value": "Alpha" }])
        .unwrap();
    let docs = db
        .find(COLLECTION, &doc! { "string_value": "alpha" }, &[])
        .unwrap();
    assert_eq!(pkeys(&docs), vec![1]);
}

#[test]
fn or_across_indexed_fields_unions() {
    let db = test_db();
    seed_five(&db);

    let filter = doc! { "$or": [ { "int_value": 10 }, { "bool_value": false } ] };
    let mut keys = pkeys(&db.find(COLLECTION, &filter, &[]).unwrap());
    keys.sort();
    assert_eq!(keys, vec![1, 2, 3, 30]);

    let explain = db.explain(COLLECTION, &filter, &[]).unwrap();
    assert_eq!(explain.read_type, READ_SECONDARY);
}

#[test]
fn conjunction_uses_index_plus_residual() {
    let db = test_db();
    seed_five(&db);

    let filter = doc! { "bool_value": false, "int_value": { "$gt": 5 } };
    let mut keys = pkeys(&db.find(COLLECTION, &filter, &[]).unwrap());
    keys.sort();
    assert_eq!(keys, vec![3, 30]);
}

#[test]
fn ne_falls_back_to_primary_scan() {
    let db = test_db();
    seed_five(&db);

    let filter = doc! { "int_value": { "$ne": 10 } };
    let mut keys = pkeys(&db.find(COLLECTION, &filter, &[]).unwrap());
    keys.sort();
    assert_eq!(keys, vec![2, 3, 4, 30]);

    let explain = db.explain(COLLECTION, &filter, &[]).unwrap();
    assert_eq!(explain.read_type, READ_PRIMARY);
}

#[test]
fn array_membership_matches_and_dedupes() {
    let db = test_db();
    seed_five(&db);

    db.insert(
        COLLECTION,
        vec![doc! { "pkey_int": 8, "tags": ["x", "y", "x"] }],
    )
    .unwrap();

    // The duplicated element produces distinct entries (array_pos),
    // but the document comes back once.
    let docs = db.find(COLLECTION, &doc! { "tags": "x" }, &[]).unwrap();
    assert_eq!(pkeys(&docs), vec![8]);
}

#[test]
fn sort_on_non_planned_field_is_in_memory() {
    let db = test_db();
    seed_five(&db);

    let docs = db
        .find(
            COLLECTION,
            &doc! { "bool_value": { "$lte": true } },
            &[Sort::asc("int_value")],
        )
        .unwrap();
    assert_eq!(pkeys(&docs), vec![2, 4, 1, 30, 3]);
}
