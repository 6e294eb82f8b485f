use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value, json};

use lineage_core::config::HistoryConfig;
use lineage_core::memory::history::record_key;
use lineage_core::memory::signature::{is_near_no_op, positional_delta, signature};
use lineage_core::memory::{
    GraphStateSnapshot, HistoryLog, HistoryMove, HistoryStore, LayoutDirection, Position,
    PushOutcome,
};
use lineage_core::services::{GatewayError, MemoryGateway, PersistenceGateway};
use lineage_core::utils::{ManualClock, WriteCoalescer};

const FILE: &str = "orders.csv";

/// Snapshot with node "a" at (x, 0).
fn at(x: f64) -> GraphStateSnapshot {
    let mut s = GraphStateSnapshot::default();
    s.positions.insert("a".into(), Position::new(x, 0.0));
    s
}

/// Wraps a memory store and counts writes.
#[derive(Default)]
struct CountingGateway {
    inner: MemoryGateway,
    puts: AtomicUsize,
}

impl CountingGateway {
    fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

impl PersistenceGateway for CountingGateway {
    fn get(&self, key: &str) -> Result<Option<Value>, GatewayError> {
        self.inner.get(key)
    }
    fn put(&self, key: &str, value: &Value) -> Result<(), GatewayError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, value)
    }
    fn remove(&self, key: &str) -> Result<(), GatewayError> {
        self.inner.remove(key)
    }
}

struct FailingGateway;

impl PersistenceGateway for FailingGateway {
    fn get(&self, _key: &str) -> Result<Option<Value>, GatewayError> {
        Err(GatewayError::Unavailable("quota exceeded".into()))
    }
    fn put(&self, _key: &str, _value: &Value) -> Result<(), GatewayError> {
        Err(GatewayError::Unavailable("quota exceeded".into()))
    }
    fn remove(&self, _key: &str) -> Result<(), GatewayError> {
        Err(GatewayError::Unavailable("quota exceeded".into()))
    }
}

fn store_with(gw: Arc<dyn PersistenceGateway>) -> (HistoryStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_000));
    let store = HistoryStore::new(HistoryConfig::default(), gw, clock.clone());
    (store, clock)
}

fn store() -> (HistoryStore, Arc<ManualClock>) {
    store_with(Arc::new(MemoryGateway::new()))
}

fn stored_log(gw: &dyn PersistenceGateway) -> HistoryLog {
    let v = gw
        .get(&record_key(FILE))
        .expect("get")
        .expect("record present");
    serde_json::from_value(v).expect("decode log")
}

// ---------- push / dedup ----------

#[test]
fn identical_pushes_keep_one_entry() {
    let (mut h, _) = store();
    assert!(h.push(FILE, at(10.0)).appended());
    assert_eq!(h.push(FILE, at(10.0)), PushOutcome::Duplicate);
    assert_eq!(h.len(FILE), 1);
    assert!(!h.can_undo(FILE));
    assert!(!h.can_redo(FILE));
}

#[test]
fn timestamps_do_not_defeat_dedup() {
    let (mut h, _) = store();
    let mut a = at(10.0);
    a.timestamp = 1;
    let mut b = at(10.0);
    b.timestamp = 99;
    h.push(FILE, a);
    assert_eq!(h.push(FILE, b), PushOutcome::Duplicate);
}

#[test]
fn small_drift_is_jitter() {
    let (mut h, _) = store();
    h.push(FILE, at(10.0));
    // Moves under the sampled rounding but still different digests are jitter.
    let mut s = at(10.0);
    s.positions.insert("b".into(), Position::new(0.5, 0.5));
    assert_eq!(h.push(FILE, s), PushOutcome::Jitter);
    assert_eq!(h.len(FILE), 1);

    // A real move is recorded.
    assert!(h.push(FILE, at(15.0)).appended());
    assert_eq!(h.len(FILE), 2);
}

#[test]
fn layout_change_is_never_jitter() {
    let (mut h, _) = store();
    h.push(FILE, at(10.0));
    let mut s = at(10.0);
    s.layout_direction = LayoutDirection::LR;
    assert!(h.push(FILE, s).appended());
}

#[test]
fn push_after_undo_cuts_the_redo_branch() {
    let (mut h, _) = store();
    h.push(FILE, at(0.0));
    h.push(FILE, at(10.0));
    h.push(FILE, at(20.0));
    assert!(matches!(h.undo(FILE), HistoryMove::Moved(_)));
    assert!(matches!(h.undo(FILE), HistoryMove::Moved(_)));
    assert!(h.can_redo(FILE));

    assert_eq!(
        h.push(FILE, at(100.0)),
        PushOutcome::Appended { index: 1, evicted: 0 }
    );
    let log = h.log(FILE).expect("log");
    assert_eq!(log.entries, vec![at(0.0), at(100.0)]);
    assert_eq!(log.index, 1);
    assert!(!h.can_redo(FILE));
}

#[test]
fn duplicate_push_after_undo_still_cuts_the_branch() {
    let (mut h, _) = store();
    h.push(FILE, at(0.0));
    h.push(FILE, at(10.0));
    h.undo(FILE);
    assert_eq!(h.push(FILE, at(0.0)), PushOutcome::Duplicate);
    assert_eq!(h.len(FILE), 1);
    assert!(!h.can_redo(FILE));
}

#[test]
fn oldest_entries_are_evicted_past_the_limit() {
    let (mut h, _) = store();
    let mut evicted = 0;
    for i in 0..25 {
        if let PushOutcome::Appended { evicted: e, .. } = h.push(FILE, at(i as f64 * 10.0)) {
            evicted += e;
        }
    }
    assert_eq!(evicted, 5);
    let log = h.log(FILE).expect("log");
    assert_eq!(log.len(), 20);
    assert_eq!(log.index, 19);
    assert_eq!(log.entries[0], at(50.0));
}

// ---------- undo / redo ----------

#[test]
fn undo_then_redo_round_trips() {
    let (mut h, _) = store();
    let states: Vec<GraphStateSnapshot> = (0..6).map(|i| at(i as f64 * 10.0)).collect();
    assert!(h.ensure_initial(FILE, states[0].clone()));
    for s in &states[1..] {
        assert!(h.push(FILE, s.clone()).appended());
    }

    for expected in states[..5].iter().rev() {
        assert_eq!(h.undo(FILE), HistoryMove::Moved(expected.clone()));
    }
    assert_eq!(h.undo(FILE), HistoryMove::Exhausted);
    assert_eq!(h.current(FILE), Some(&states[0]));

    for expected in &states[1..] {
        assert_eq!(h.redo(FILE), HistoryMove::Moved(expected.clone()));
    }
    assert_eq!(h.redo(FILE), HistoryMove::Exhausted);
    assert_eq!(h.index(FILE), Some(5));
}

#[test]
fn unknown_file_has_nothing_to_undo() {
    let (mut h, _) = store();
    assert_eq!(h.undo("nope"), HistoryMove::Exhausted);
    assert_eq!(h.redo("nope"), HistoryMove::Exhausted);
    assert_eq!(h.index("nope"), None);
    assert_eq!(h.len("nope"), 0);
}

#[test]
fn ensure_initial_only_seeds_an_empty_log() {
    let (mut h, _) = store();
    assert!(h.ensure_initial(FILE, at(0.0)));
    assert!(!h.ensure_initial(FILE, at(50.0)));
    assert_eq!(h.len(FILE), 1);
    assert_eq!(h.current(FILE), Some(&at(0.0)));
}

// ---------- debounced persistence ----------

#[test]
fn rapid_pushes_coalesce_into_one_write() {
    let gw = Arc::new(CountingGateway::default());
    let (mut h, clock) = store_with(gw.clone());

    h.push(FILE, at(0.0));
    clock.advance(50);
    h.push(FILE, at(10.0));
    clock.advance(50);
    h.push(FILE, at(20.0));
    assert!(h.pending(FILE).is_some());
    assert_eq!(h.next_flush_due(), Some(1_100 + 120));

    clock.advance(119);
    assert_eq!(h.flush_due(), 0);
    assert_eq!(gw.puts(), 0);

    clock.advance(1);
    assert_eq!(h.flush_due(), 1);
    assert_eq!(gw.puts(), 1);
    assert!(h.pending(FILE).is_none());

    let log = stored_log(gw.as_ref());
    assert_eq!(log.len(), 3);
    assert_eq!(log.index, 2);
}

#[test]
fn undo_inside_the_window_supersedes_the_pending_write() {
    let gw = Arc::new(CountingGateway::default());
    let (mut h, clock) = store_with(gw.clone());

    h.push(FILE, at(0.0));
    h.push(FILE, at(10.0));
    assert!(h.pending(FILE).is_some());

    h.undo(FILE);
    assert!(h.pending(FILE).is_none());
    assert_eq!(gw.puts(), 1);

    clock.advance(500);
    assert_eq!(h.flush_due(), 0);
    assert_eq!(gw.puts(), 1);

    let log = stored_log(gw.as_ref());
    assert_eq!(log.index, 0);
    assert_eq!(log.len(), 2);
}

#[test]
fn dropping_the_store_flushes_pending_writes() {
    let gw = Arc::new(CountingGateway::default());
    {
        let (mut h, _) = store_with(gw.clone());
        h.push(FILE, at(0.0));
        h.push(FILE, at(30.0));
        assert_eq!(gw.puts(), 0);
    }
    assert_eq!(gw.puts(), 1);
    assert_eq!(stored_log(gw.as_ref()).len(), 2);
}

#[test]
fn gateway_failure_degrades_without_losing_history() {
    let (mut h, clock) = store_with(Arc::new(FailingGateway));
    assert!(!h.load(FILE));
    h.push(FILE, at(0.0));
    h.push(FILE, at(10.0));
    clock.advance(200);
    assert_eq!(h.flush_due(), 0);
    assert!(h.is_degraded(FILE));

    assert_eq!(h.undo(FILE), HistoryMove::Moved(at(0.0)));
    assert_eq!(h.redo(FILE), HistoryMove::Moved(at(10.0)));
    assert_eq!(h.len(FILE), 2);
}

#[test]
fn successful_write_clears_degraded_flag() {
    let gw = Arc::new(MemoryGateway::new());
    let (mut h, _) = store_with(gw.clone());
    // Unreadable record marks nothing degraded; only failed gateway calls do.
    gw.put(&record_key(FILE), &json!("not a log")).expect("put");
    assert!(!h.load(FILE));
    assert!(!h.is_degraded(FILE));
    h.push(FILE, at(0.0));
    assert_eq!(h.flush_all(), 1);
    assert!(!h.is_degraded(FILE));
}

// ---------- hydration ----------

#[test]
fn stored_history_is_restored_by_a_new_store() {
    let gw: Arc<dyn PersistenceGateway> = Arc::new(MemoryGateway::new());
    {
        let (mut h, _) = store_with(gw.clone());
        h.push(FILE, at(0.0));
        h.push(FILE, at(10.0));
        h.push(FILE, at(20.0));
        h.undo(FILE);
    }
    let (mut h, _) = store_with(gw);
    assert!(h.load(FILE));
    assert_eq!(h.len(FILE), 3);
    assert_eq!(h.index(FILE), Some(1));
    assert!(h.can_undo(FILE) && h.can_redo(FILE));
}

#[test]
fn stored_history_is_normalized_on_load() {
    let gw: Arc<dyn PersistenceGateway> = Arc::new(MemoryGateway::new());
    let entries: Vec<GraphStateSnapshot> = (0..3).map(|i| at(i as f64 * 10.0)).collect();
    let bogus = json!({ "entries": entries, "index": 99 });
    gw.put(&record_key(FILE), &bogus).expect("put");

    let (mut h, _) = store_with(gw.clone());
    assert!(h.load(FILE));
    assert_eq!(h.index(FILE), Some(2));

    // Oversized logs lose their oldest entries.
    let many: Vec<GraphStateSnapshot> = (0..30).map(|i| at(i as f64 * 10.0)).collect();
    gw.put(&record_key("big.csv"), &json!({ "entries": many, "index": 4 }))
        .expect("put");
    assert!(h.load("big.csv"));
    assert_eq!(h.len("big.csv"), 20);
    assert_eq!(h.index("big.csv"), Some(0));
}

#[test]
fn negative_stored_index_clamps_to_the_oldest_entry() {
    let gw: Arc<dyn PersistenceGateway> = Arc::new(MemoryGateway::new());
    let entries = vec![at(0.0), at(10.0)];
    gw.put(&record_key(FILE), &json!({ "entries": entries, "index": -1 }))
        .expect("put");

    let (mut h, _) = store_with(gw);
    assert!(h.load(FILE));
    assert_eq!(h.len(FILE), 2);
    assert_eq!(h.index(FILE), Some(0));
    assert_eq!(h.redo(FILE), HistoryMove::Moved(at(10.0)));
}

#[test]
fn empty_or_missing_record_loads_nothing() {
    let gw: Arc<dyn PersistenceGateway> = Arc::new(MemoryGateway::new());
    gw.put(&record_key(FILE), &json!({ "entries": [], "index": 0 }))
        .expect("put");
    let (mut h, _) = store_with(gw);
    assert!(!h.load(FILE));
    assert!(!h.load("missing.csv"));
    assert_eq!(h.len(FILE), 0);
}

#[test]
fn clear_forgets_memory_queue_and_storage() {
    let gw = Arc::new(CountingGateway::default());
    let (mut h, _) = store_with(gw.clone());
    h.push(FILE, at(0.0));
    h.flush_all();
    h.push(FILE, at(10.0));
    h.clear(FILE);
    assert_eq!(h.len(FILE), 0);
    assert!(h.pending(FILE).is_none());
    assert!(gw.get(&record_key(FILE)).expect("get").is_none());
}

// ---------- signature helpers ----------

#[test]
fn signature_ignores_positions_past_the_sample() {
    let mut a = GraphStateSnapshot::default();
    for i in 0..30 {
        a.positions.insert(format!("n{i:02}"), Position::new(i as f64, 0.0));
    }
    let mut b = a.clone();
    b.positions.insert("n29".into(), Position::new(900.0, 900.0));
    assert_eq!(signature(&a, 20), signature(&b, 20));
    assert_ne!(signature(&a, 30), signature(&b, 30));
}

#[test]
fn signature_sees_filters_and_closure() {
    let a = at(0.0);
    let mut b = at(0.0);
    b.filters
        .insert("type".into(), ["table".to_string()].into_iter().collect());
    assert_ne!(signature(&a, 20), signature(&b, 20));

    let mut c = at(0.0);
    c.neighborhood_closure.insert("a".into());
    assert_ne!(signature(&a, 20), signature(&c, 20));
}

#[test]
fn delta_counts_missing_nodes_at_origin() {
    let mut a = GraphStateSnapshot::default();
    a.positions.insert("x".into(), Position::new(3.0, 4.0));
    let b = GraphStateSnapshot::default();
    assert_eq!(positional_delta(&a, &b), 7.0);
    assert!(!is_near_no_op(&a, &b, 2.0));
    assert!(is_near_no_op(&a, &a, 2.0));
}

// ---------- coalescer ----------

#[test]
fn coalescer_keeps_only_the_latest_payload() {
    let mut q: WriteCoalescer<u32> = WriteCoalescer::new(120);
    assert!(!q.schedule("k", 1, 0));
    assert!(q.schedule("k", 2, 100));
    q.schedule("j", 7, 10);
    assert_eq!(q.len(), 2);
    assert_eq!(q.next_due(), Some(130));

    assert_eq!(q.take_due(130), vec![("j".to_string(), 7)]);
    assert!(q.take_due(219).is_empty());
    assert_eq!(q.take_due(220), vec![("k".to_string(), 2)]);
    assert!(q.is_empty());

    q.schedule("k", 3, 0);
    assert_eq!(q.cancel("k"), Some(3));
    assert!(q.drain().is_empty());
}
