//! utils/coalesce.rs
//!
//! Pending-write coalescing keyed by record key.
//!
//! `schedule` replaces any payload already waiting for the same key and
//! pushes its deadline out by one window (trailing debounce). The owner polls
//! `take_due` from its event loop; `cancel` drops a payload that a direct
//! write made obsolete.

use std::collections::HashMap;

#[derive(Debug)]
struct Pending<V> {
    value: V,
    due_ms: i64,
}

#[derive(Debug)]
pub struct WriteCoalescer<V> {
    window_ms: i64,
    pending: HashMap<String, Pending<V>>,
}

impl<V> WriteCoalescer<V> {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms: i64::try_from(window_ms).unwrap_or(i64::MAX),
            pending: HashMap::new(),
        }
    }

    /// Queue `value` for `key`. Returns true if it superseded a queued payload.
    pub fn schedule(&mut self, key: &str, value: V, now_ms: i64) -> bool {
        let due_ms = now_ms.saturating_add(self.window_ms);
        self.pending
            .insert(key.to_string(), Pending { value, due_ms })
            .is_some()
    }

    /// Remove and return every payload whose window has elapsed, in key order.
    pub fn take_due(&mut self, now_ms: i64) -> Vec<(String, V)> {
        let mut keys: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.due_ms <= now_ms)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|k| self.pending.remove(&k).map(|p| (k, p.value)))
            .collect()
    }

    /// Remove and return everything, due or not, in key order.
    pub fn drain(&mut self) -> Vec<(String, V)> {
        let mut all: Vec<(String, V)> = self.pending.drain().map(|(k, p)| (k, p.value)).collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn cancel(&mut self, key: &str) -> Option<V> {
        self.pending.remove(key).map(|p| p.value)
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.pending.get(key).map(|p| &p.value)
    }

    /// Earliest deadline among queued payloads, for sleeping until the next flush.
    pub fn next_due(&self) -> Option<i64> {
        self.pending.values().map(|p| p.due_ms).min()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
