use std::sync::Arc;

use chronicle_temporal::{
    GetResult, ManualClock, Order, Period, StoreConfig, TemporalKey, TemporalStore, WriteBatch, MASTER,
};
use tempfile::tempdir;

fn open_store(dir: &std::path::Path) -> TemporalStore {
    let clock = Arc::new(ManualClock::new(1_000));
    TemporalStore::open_with_clock(dir, StoreConfig::default(), clock).expect("open store")
}

fn put(store: &TemporalStore, key: &str, value: &str) -> i64 {
    let mut batch = WriteBatch::new();
    batch.put("ns", key, value);
    store.commit(MASTER, &batch).expect("commit")
}

#[test]
fn value_and_period_follow_commits() {
    let dir = tempdir().expect("tempdir");
    let store = open_store(dir.path());
    let t1 = put(&store, "foo", "bar");
    let t2 = put(&store, "foo", "baz");
    assert!(t2 > t1);

    for t in [t1, t2 - 1] {
        let result = store.get(MASTER, "ns", "foo", t).expect("get");
        assert_eq!(result.value.as_deref(), Some(&b"bar"[..]));
        assert_eq!(result.period, Period::new(t1, t2).unwrap());
    }
    for t in [t2, t2 + 1_000] {
        let result = store.get(MASTER, "ns", "foo", t).expect("get");
        assert_eq!(result.value.as_deref(), Some(&b"baz"[..]));
        assert_eq!(result.period, Period::starting_at(t2).unwrap());
    }
    let before = store.get(MASTER, "ns", "foo", t1 - 1).expect("get");
    assert_eq!(before, GetResult::absent(Period::up_to(t1).unwrap()));
    assert!(!store.exists(MASTER, "ns", "foo", 0).expect("exists"));
    assert!(store.exists(MASTER, "ns", "foo", t1).expect("exists"));
}

#[test]
fn delete_is_an_absent_version() {
    let dir = tempdir().expect("tempdir");
    let store = open_store(dir.path());
    let t1 = put(&store, "foo", "bar");
    let mut batch = WriteBatch::new();
    batch.delete("ns", "foo");
    let t2 = store.commit(MASTER, &batch).expect("delete");
    let t3 = put(&store, "foo", "again");

    let deleted = store.get(MASTER, "ns", "foo", t2).expect("get");
    assert_eq!(deleted, GetResult::absent(Period::new(t2, t3).unwrap()));
    assert_eq!(
        store.history(MASTER, "ns", "foo", &Period::eternal(), Order::Ascending).expect("history"),
        vec![t1, t2, t3]
    );
    assert_eq!(
        store.history(MASTER, "ns", "foo", &Period::eternal(), Order::Descending).expect("history"),
        vec![t3, t2, t1]
    );
}

#[test]
fn never_written_key_is_eternally_absent() {
    let dir = tempdir().expect("tempdir");
    let store = open_store(dir.path());
    put(&store, "foo", "bar");
    let result = store.get(MASTER, "ns", "nothing", 5_000).expect("get");
    assert_eq!(result, GetResult::absent(Period::eternal()));
    // keys sharing a prefix do not leak into each other
    let result = store.get(MASTER, "ns", "fo", 5_000).expect("get");
    assert!(!result.is_present());
}

#[test]
fn invalid_arguments_are_preconditions() {
    let dir = tempdir().expect("tempdir");
    let store = open_store(dir.path());
    assert!(store.get(MASTER, "", "k", 1).unwrap_err().is_precondition());
    assert!(store.get(MASTER, "ns", "", 1).unwrap_err().is_precondition());
    assert!(store.get(MASTER, "ns", "k", -1).unwrap_err().is_precondition());
    assert!(store.commit(MASTER, &WriteBatch::new()).unwrap_err().is_precondition());
    assert!(Period::new(5, 5).unwrap_err().is_precondition());
}

#[test]
fn batch_commits_under_one_timestamp() {
    let dir = tempdir().expect("tempdir");
    let store = open_store(dir.path());
    let mut batch = WriteBatch::new();
    batch.put("ns", "a", "1").put("ns", "b", "2").put("other", "c", "3");
    let t1 = store.commit(MASTER, &batch).expect("commit");
    let t2 = put(&store, "a", "10");

    assert_eq!(
        store.modifications(MASTER, "ns", &Period::eternal()).expect("modifications"),
        vec![(t1, "a".to_string()), (t1, "b".to_string()), (t2, "a".to_string())]
    );
    assert_eq!(
        store.modifications(MASTER, "ns", &Period::starting_at(t2).unwrap()).expect("modifications"),
        vec![(t2, "a".to_string())]
    );
    assert_eq!(store.keys(MASTER, "ns", t1).expect("keys"), vec!["a", "b"]);
    assert_eq!(store.keyspaces(MASTER, t2).expect("keyspaces"), vec!["ns", "other"]);
    assert_eq!(
        store.commits(MASTER, &Period::eternal(), Order::Descending).expect("commits"),
        vec![t2, t1]
    );
    assert_eq!(
        store.commits(MASTER, &Period::new(t1, t2).unwrap(), Order::Ascending).expect("commits"),
        vec![t1]
    );
}

#[test]
fn all_entries_lists_versions_by_key() {
    let dir = tempdir().expect("tempdir");
    let store = open_store(dir.path());
    let t1 = put(&store, "b", "1");
    let t2 = put(&store, "a", "2");
    let mut batch = WriteBatch::new();
    batch.delete("ns", "b");
    let t3 = store.commit(MASTER, &batch).expect("delete");

    let entries = store.all_entries(MASTER, "ns", &Period::eternal()).expect("entries");
    let expected = vec![
        (TemporalKey::new("ns", "a", t2).unwrap(), Some(b"2".to_vec())),
        (TemporalKey::new("ns", "b", t1).unwrap(), Some(b"1".to_vec())),
        (TemporalKey::new("ns", "b", t3).unwrap(), None),
    ];
    assert_eq!(entries, expected);
    assert!(store.keys(MASTER, "ns", t3).expect("keys") == vec!["a"]);
}
