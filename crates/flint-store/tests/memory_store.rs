use flint_store::{KvStore, KvTransaction, MemoryStore};

fn collect(
    txn: &impl KvTransaction,
    lo: &[u8],
    hi: &[u8],
    reverse: bool,
) -> Vec<(Vec<u8>, Vec<u8>)> {
    txn.range_scan(lo, hi, reverse)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

#[test]
fn set_get_roundtrip() {
    let store = MemoryStore::new();
    let txn = store.begin(false).unwrap();
    txn.set(b"k1", b"v1").unwrap();
    assert_eq!(txn.get(b"k1").unwrap(), Some(b"v1".to_vec()));
    txn.commit().unwrap();

    let txn = store.begin(true).unwrap();
    assert_eq!(txn.get(b"k1").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(txn.get(b"missing").unwrap(), None);
}

#[test]
fn rollback_discards_writes() {
    let store = MemoryStore::new();
    let txn = store.begin(false).unwrap();
    txn.set(b"k1", b"v1").unwrap();
    txn.rollback().unwrap();

    let txn = store.begin(true).unwrap();
    assert_eq!(txn.get(b"k1").unwrap(), None);
}

#[test]
fn read_only_rejects_writes() {
    let store = MemoryStore::new();
    let txn = store.begin(true).unwrap();
    assert!(txn.set(b"k", b"v").is_err());
    assert!(txn.clear(b"k").is_err());
    assert!(txn.clear_range(b"a", b"z").is_err());
}

#[test]
fn range_scan_is_lexicographic() {
    let store = MemoryStore::new();
    let txn = store.begin(false).unwrap();
    for key in [b"b".as_slice(), b"a", b"c", b"ab"] {
        txn.set(key, b"x").unwrap();
    }
    txn.commit().unwrap();

    let txn = store.begin(true).unwrap();
    let keys: Vec<Vec<u8>> = collect(&txn, b"", b"\xff", false)
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"ab".to_vec(), b"b".to_vec(), b"c".to_vec()]);
}

#[test]
fn range_scan_bounds_are_half_open() {
    let store = MemoryStore::new();
    let txn = store.begin(false).unwrap();
    for key in [b"a", b"b", b"c", b"d"] {
        txn.set(key, b"x").unwrap();
    }
    txn.commit().unwrap();

    let txn = store.begin(true).unwrap();
    let keys: Vec<Vec<u8>> = collect(&txn, b"b", b"d", false)
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
}

#[test]
fn reverse_scan_inverts_order() {
    let store = MemoryStore::new();
    let txn = store.begin(false).unwrap();
    for key in [b"a", b"b", b"c"] {
        txn.set(key, b"x").unwrap();
    }
    txn.commit().unwrap();

    let txn = store.begin(true).unwrap();
    let keys: Vec<Vec<u8>> = collect(&txn, b"", b"\xff", true)
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
}

#[test]
fn scan_sees_own_uncommitted_writes() {
    let store = MemoryStore::new();
    let txn = store.begin(false).unwrap();
    txn.set(b"k1", b"v1").unwrap();
    let rows = collect(&txn, b"", b"\xff", false);
    assert_eq!(rows.len(), 1);
    txn.rollback().unwrap();
}

#[test]
fn snapshot_isolation_for_readers() {
    let store = MemoryStore::new();
    let setup = store.begin(false).unwrap();
    setup.set(b"k1", b"old").unwrap();
    setup.commit().unwrap();

    // Reader snapshots before the writer commits.
    let reader = store.begin(true).unwrap();

    let writer = store.begin(false).unwrap();
    writer.set(b"k1", b"new").unwrap();
    writer.commit().unwrap();

    assert_eq!(reader.get(b"k1").unwrap(), Some(b"old".to_vec()));

    let reader = store.begin(true).unwrap();
    assert_eq!(reader.get(b"k1").unwrap(), Some(b"new".to_vec()));
}

#[test]
fn clear_range_removes_half_open_span() {
    let store = MemoryStore::new();
    let txn = store.begin(false).unwrap();
    for key in [b"a", b"b", b"c", b"d"] {
        txn.set(key, b"x").unwrap();
    }
    txn.clear_range(b"b", b"d").unwrap();
    txn.commit().unwrap();

    let txn = store.begin(true).unwrap();
    let keys: Vec<Vec<u8>> = collect(&txn, b"", b"\xff", false)
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"d".to_vec()]);
}

#[test]
fn keys_with_embedded_zero_bytes() {
    let store = MemoryStore::new();
    let txn = store.begin(false).unwrap();
    txn.set(b"a\x00b", b"1").unwrap();
    txn.set(b"a\x00", b"2").unwrap();
    txn.set(b"a", b"3").unwrap();
    txn.commit().unwrap();

    let txn = store.begin(true).unwrap();
    let keys: Vec<Vec<u8>> = collect(&txn, b"", b"\xff", false)
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(
        keys,
        vec![b"a".to_vec(), b"a\x00".to_vec(), b"a\x00b".to_vec()]
    );
}

#[test]
fn scan_order_matches_sorted_keys() {
    use rand::{Rng, SeedableRng};

    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let mut keys: Vec<Vec<u8>> = (0..200)
        .map(|_| {
            let len = rng.gen_range(1..12);
            (0..len).map(|_| rng.gen_range(0u8..=254)).collect()
        })
        .collect();

    let store = MemoryStore::new();
    let txn = store.begin(false).unwrap();
    for key in &keys {
        txn.set(key, b"v").unwrap();
    }
    txn.commit().unwrap();

    keys.sort();
    keys.dedup();

    let txn = store.begin(true).unwrap();
    let scanned: Vec<Vec<u8>> = collect(&txn, b"", &[0xff; 16], false)
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(scanned, keys);
}

#[test]
fn scan_snapshot_is_stable_under_writes() {
    let store = MemoryStore::new();
    let txn = store.begin(false).unwrap();
    txn.set(b"a", b"1").unwrap();
    txn.set(b"b", b"2").unwrap();

    let mut iter = txn.range_scan(b"", b"\xff", false).unwrap();
    let first = iter.next().unwrap().unwrap();
    assert_eq!(first.0, b"a".to_vec());

    // A write landing mid-scan does not appear in this iterator.
    txn.set(b"aa", b"3").unwrap();
    let second = iter.next().unwrap().unwrap();
    assert_eq!(second.0, b"b".to_vec());
    assert!(iter.next().is_none());
    drop(iter);
    txn.rollback().unwrap();
}
