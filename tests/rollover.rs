use std::sync::Arc;

use chronicle_temporal::{
    ChunkState, GetResult, IndexKind, IndexScanCursor, IndexValue, ManualClock, Order, Period,
    RolloverPolicy, StoreConfig, TemporalKey, TemporalStore, WriteBatch, MASTER, OPEN_END,
};
use tempfile::tempdir;

fn open_store(dir: &std::path::Path, policy: RolloverPolicy) -> (TemporalStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_000));
    let config = StoreConfig {
        rollover_policy: policy,
        ..StoreConfig::default()
    };
    let store = TemporalStore::open_with_clock(dir, config, clock.clone()).expect("open store");
    (store, clock)
}

fn put(store: &TemporalStore, branch: &str, key: &str, value: &str) -> i64 {
    let mut batch = WriteBatch::new();
    batch.put("ns", key, value);
    store.commit(branch, &batch).expect("commit")
}

fn delete(store: &TemporalStore, branch: &str, key: &str) -> i64 {
    let mut batch = WriteBatch::new();
    batch.delete("ns", key);
    store.commit(branch, &batch).expect("delete")
}

#[test]
fn reads_span_chunks_and_skip_carry_forward() {
    let dir = tempdir().expect("tempdir");
    let (store, _clock) = open_store(dir.path(), RolloverPolicy::Never);
    let t1 = put(&store, MASTER, "foo", "bar");
    let t2 = put(&store, MASTER, "x", "1");
    let t3 = delete(&store, MASTER, "x");
    let next = store.rollover(MASTER).expect("rollover");
    let tr = next.valid_from;
    assert!(tr > t3);
    let t4 = put(&store, MASTER, "foo", "baz");

    let chunks = store.chunks(MASTER).expect("chunks");
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].state(), ChunkState::RolledOver);
    assert_eq!(chunks[0].valid_to, Some(tr));
    assert_eq!(chunks[1].state(), ChunkState::Open);

    let old = store.get(MASTER, "ns", "foo", t1).expect("get");
    assert_eq!(old.value.as_deref(), Some(&b"bar"[..]));
    assert_eq!(old.period, Period::new(t1, tr).unwrap());
    let carried = store.get(MASTER, "ns", "foo", tr).expect("get");
    assert_eq!(carried.value.as_deref(), Some(&b"bar"[..]));
    assert_eq!(carried.period, Period::new(tr, t4).unwrap());
    let new = store.get(MASTER, "ns", "foo", t4).expect("get");
    assert_eq!(new.value.as_deref(), Some(&b"baz"[..]));

    let x = store.get(MASTER, "ns", "x", t2).expect("get");
    assert_eq!(x.value.as_deref(), Some(&b"1"[..]));
    assert!(!store.exists(MASTER, "ns", "x", tr).expect("get"));

    assert_eq!(
        store.history(MASTER, "ns", "foo", &Period::eternal(), Order::Ascending).expect("history"),
        vec![t1, t4]
    );
    assert_eq!(
        store.commits(MASTER, &Period::eternal(), Order::Ascending).expect("commits"),
        vec![t1, t2, t3, t4]
    );
    assert!(store
        .modifications(MASTER, "ns", &Period::eternal())
        .expect("modifications")
        .iter()
        .all(|(ts, _)| *ts != tr));
}

#[test]
fn all_entries_includes_carry_forward_of_first_chunk_only() {
    let dir = tempdir().expect("tempdir");
    let (store, _clock) = open_store(dir.path(), RolloverPolicy::Never);
    let t1 = put(&store, MASTER, "foo", "bar");
    let tr = store.rollover(MASTER).expect("rollover").valid_from;
    let t2 = put(&store, MASTER, "foo", "baz");

    let key = |ts| TemporalKey::new("ns", "foo", ts).unwrap();
    let everything = store.all_entries(MASTER, "ns", &Period::eternal()).expect("entries");
    assert_eq!(
        everything,
        vec![(key(t1), Some(b"bar".to_vec())), (key(t2), Some(b"baz".to_vec()))]
    );
    let from_rollover = store
        .all_entries(MASTER, "ns", &Period::starting_at(tr).unwrap())
        .expect("entries");
    assert_eq!(
        from_rollover,
        vec![(key(tr), Some(b"bar".to_vec())), (key(t2), Some(b"baz".to_vec()))]
    );
}

#[test]
fn rolled_branch_stops_consulting_parent() {
    let dir = tempdir().expect("tempdir");
    let (store, _clock) = open_store(dir.path(), RolloverPolicy::Never);
    store.define_index("age", IndexKind::Long).expect("index");
    let mut batch = WriteBatch::new();
    batch.put("ns", "foo", "a").index("age", IndexValue::Long(7), "foo");
    let t1 = store.commit(MASTER, &batch).expect("commit");
    store.create_branch("dev", MASTER, None).expect("branch");

    let tr = store.rollover("dev").expect("rollover").valid_from;
    put(&store, MASTER, "foo", "changed-on-master");
    put(&store, MASTER, "late", "invisible");

    let now = store.branch("dev").expect("dev").now;
    assert_eq!(now, tr);
    let foo = store.get("dev", "ns", "foo", now).expect("get");
    assert_eq!(foo.value.as_deref(), Some(&b"a"[..]));
    assert_eq!(foo.period, Period::starting_at(tr).unwrap());
    assert!(!store.exists("dev", "ns", "late", now + 10).expect("get"));
    // before the rollover dev still resolves through master
    let early = store.get("dev", "ns", "foo", t1).expect("get");
    assert_eq!(early.period.lower(), t1);

    let mut cursor = store.open_index_scan("dev", now, "age", Order::Ascending).expect("scan");
    assert_eq!(store.open_cursors(), 1);
    let entries = cursor.collect_entries().expect("entries");
    assert_eq!(entries, vec![(IndexValue::Long(7), "foo".to_string())]);

    let mut batch = WriteBatch::new();
    batch.unindex("age", IndexValue::Long(7), "foo");
    let t5 = store.commit("dev", &batch).expect("unindex");
    let mut cursor = store.open_index_scan("dev", t5, "age", Order::Ascending).expect("scan");
    assert!(cursor.collect_entries().expect("entries").is_empty());
    assert_eq!(store.keys("dev", "ns", t5).expect("keys"), vec!["foo"]);
}

#[test]
fn entry_threshold_rolls_over_after_commit() {
    let dir = tempdir().expect("tempdir");
    let (store, _clock) = open_store(dir.path(), RolloverPolicy::EntryThreshold { entries: 6 });
    put(&store, MASTER, "a", "1");
    assert_eq!(store.chunks(MASTER).expect("chunks").len(), 1);
    let t2 = put(&store, MASTER, "b", "2");
    let chunks = store.chunks(MASTER).expect("chunks");
    assert_eq!(chunks.len(), 2);
    assert!(chunks[1].valid_from > t2);
    assert_eq!(store.keys(MASTER, "ns", chunks[1].valid_from).expect("keys"), vec!["a", "b"]);
}

#[test]
fn age_policy_uses_commit_time() {
    let dir = tempdir().expect("tempdir");
    let (store, clock) = open_store(dir.path(), RolloverPolicy::AgeAfter { millis: 60_000 });
    put(&store, MASTER, "a", "1");
    clock.advance(30_000);
    put(&store, MASTER, "a", "2");
    assert_eq!(store.chunks(MASTER).expect("chunks").len(), 1);
    clock.advance(40_000);
    put(&store, MASTER, "a", "3");
    assert_eq!(store.chunks(MASTER).expect("chunks").len(), 2);
}

#[test]
fn incomplete_rollover_directory_is_replaced() {
    let dir = tempdir().expect("tempdir");
    let (store, _clock) = open_store(dir.path(), RolloverPolicy::Never);
    put(&store, MASTER, "foo", "bar");
    let stale = dir.path().join("branches").join(MASTER).join("000000001.chunk");
    std::fs::create_dir_all(&stale).expect("stale dir");
    std::fs::write(stale.join("data.log"), b"garbage").expect("garbage");

    let next = store.rollover(MASTER).expect("rollover");
    assert_eq!(next.index, 1);
    assert!(store.exists(MASTER, "ns", "foo", next.valid_from).expect("get"));
}

#[test]
fn never_written_key_stays_eternal_across_rollovers() {
    let dir = tempdir().expect("tempdir");
    let (store, _clock) = open_store(dir.path(), RolloverPolicy::Never);
    let t1 = put(&store, MASTER, "foo", "bar");
    let tr = store.rollover(MASTER).expect("rollover").valid_from;
    store.create_branch("dev", MASTER, None).expect("branch");
    let t2 = put(&store, "dev", "foo", "baz");
    let tr_dev = store.rollover("dev").expect("rollover").valid_from;

    for t in [0, t1, tr - 1, tr, tr + 10] {
        let on_master = store.get(MASTER, "ns", "never", t).expect("get");
        assert_eq!(on_master, GetResult::absent(Period::eternal()), "master at {t}");
    }
    for t in [0, t1, tr, t2, tr_dev, tr_dev + 10] {
        let on_dev = store.get("dev", "ns", "never", t).expect("get");
        assert_eq!(on_dev, GetResult::absent(Period::eternal()), "dev at {t}");
    }
}

#[test]
fn deleted_key_absence_runs_until_next_write_in_later_chunk() {
    let dir = tempdir().expect("tempdir");
    let (store, _clock) = open_store(dir.path(), RolloverPolicy::Never);
    let t1 = put(&store, MASTER, "x", "1");
    let t2 = delete(&store, MASTER, "x");
    let tr = store.rollover(MASTER).expect("rollover").valid_from;
    let t3 = put(&store, MASTER, "x", "2");

    let before = store.get(MASTER, "ns", "x", t1 - 1).expect("get");
    assert_eq!(before, GetResult::absent(Period::up_to(t1).unwrap()));
    for t in [t2, tr, t3 - 1] {
        let gone = store.get(MASTER, "ns", "x", t).expect("get");
        assert_eq!(gone, GetResult::absent(Period::new(t2, t3).unwrap()), "at {t}");
    }
    assert_eq!(store.get(MASTER, "ns", "x", t3).expect("get").period, Period::starting_at(t3).unwrap());
}

/// Every period of `key`, following each period's upper bound from 0. Checks
/// that periods abut and that a read anywhere inside one returns it unchanged.
fn period_chain(store: &TemporalStore, branch: &str, key: &str) -> Vec<(Option<String>, Period)> {
    let mut chain = Vec::new();
    let mut at = 0;
    loop {
        let result = store.get(branch, "ns", key, at).expect("get");
        assert_eq!(result.period.lower(), at, "{branch}/{key}: gap or overlap at {at}");
        let inside = if result.period.is_open_ended() { at + 1_000_000 } else { result.period.upper() - 1 };
        let last = store.get(branch, "ns", key, inside).expect("get");
        assert_eq!(last, result, "{branch}/{key}: period starting at {at} is not uniform");
        let value = result.value.map(|v| String::from_utf8(v).expect("utf8"));
        let upper = result.period.upper();
        chain.push((value, result.period));
        if upper == OPEN_END {
            return chain;
        }
        assert!(chain.len() < 64, "{branch}/{key}: period chain does not terminate");
        at = upper;
    }
}

fn first_lower(chain: &[(Option<String>, Period)], value: &str) -> i64 {
    chain
        .iter()
        .find(|(v, _)| v.as_deref() == Some(value))
        .map(|(_, period)| period.lower())
        .expect("value in chain")
}

#[test]
fn periods_partition_time_across_deletes_rollovers_and_forks() {
    let dir = tempdir().expect("tempdir");
    let (store, _clock) = open_store(dir.path(), RolloverPolicy::Never);
    let t1 = {
        let mut batch = WriteBatch::new();
        batch.put("ns", "foo", "a").put("ns", "bar", "1");
        store.commit(MASTER, &batch).expect("commit")
    };
    let t2 = put(&store, MASTER, "foo", "b");
    let t3 = delete(&store, MASTER, "foo");
    let tr = store.rollover(MASTER).expect("rollover").valid_from;
    let t4 = put(&store, MASTER, "foo", "c");
    let fork = store.create_branch("dev", MASTER, None).expect("branch").branching_timestamp;
    assert_eq!(fork, t4);
    let t5 = put(&store, MASTER, "foo", "d");
    let t6 = put(&store, "dev", "bar", "2");
    let tr_dev = store.rollover("dev").expect("rollover").valid_from;
    let t7 = delete(&store, "dev", "foo");

    let master_foo = period_chain(&store, MASTER, "foo");
    assert_eq!(
        master_foo,
        vec![
            (None, Period::up_to(t1).unwrap()),
            (Some("a".to_string()), Period::new(t1, t2).unwrap()),
            (Some("b".to_string()), Period::new(t2, t3).unwrap()),
            (None, Period::new(t3, t4).unwrap()),
            (Some("c".to_string()), Period::new(t4, t5).unwrap()),
            (Some("d".to_string()), Period::starting_at(t5).unwrap()),
        ]
    );
    assert!(tr > t3 && tr < t4);

    let dev_foo = period_chain(&store, "dev", "foo");
    assert_eq!(
        dev_foo,
        vec![
            (None, Period::up_to(t1).unwrap()),
            (Some("a".to_string()), Period::new(t1, t2).unwrap()),
            (Some("b".to_string()), Period::new(t2, t3).unwrap()),
            (None, Period::new(t3, t4).unwrap()),
            (Some("c".to_string()), Period::new(t4, tr_dev).unwrap()),
            (Some("c".to_string()), Period::new(tr_dev, t7).unwrap()),
            (None, Period::starting_at(t7).unwrap()),
        ]
    );

    let dev_bar = period_chain(&store, "dev", "bar");
    assert_eq!(first_lower(&dev_bar, "1"), t1);
    assert_eq!(first_lower(&dev_bar, "2"), t6);
    assert_eq!(dev_bar.last().map(|(_, p)| p.lower()), Some(tr_dev));
    let master_bar = period_chain(&store, MASTER, "bar");
    assert_eq!(master_bar.len(), 3);
    assert_eq!(master_bar[1].1, Period::new(t1, tr).unwrap());

    for branch in [MASTER, "dev"] {
        assert_eq!(period_chain(&store, branch, "never"), vec![(None, Period::eternal())]);
    }
}
