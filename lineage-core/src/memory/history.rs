//! memory/history.rs
//!
//! Linear, bounded undo/redo over `GraphStateSnapshot`s, one log per file key.
//!
//! - `push` cuts any redo branch, skips duplicates (same signature as the
//!   current tail) and jitter (near-no-op against the tail), appends, evicts
//!   from the front past `limit`, and queues a coalesced write.
//! - `undo`/`redo` move the cursor and write the in-memory log immediately,
//!   superseding whatever push payload was still waiting for that key.
//! - Gateway failures are logged and flip the key into degraded mode; the
//!   in-memory log keeps working.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::signature::{is_near_no_op, signature};
use super::snapshot::GraphStateSnapshot;
use crate::config::HistoryConfig;
use crate::services::gateway::{GatewayError, PersistenceGateway};
use crate::utils::clock::Clock;
use crate::utils::coalesce::WriteCoalescer;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistoryLog {
    #[serde(default)]
    pub entries: Vec<GraphStateSnapshot>,
    #[serde(default, deserialize_with = "lenient_index")]
    pub index: usize,
}

/// Stored cursors are read as signed integers; a negative one clamps to the
/// oldest entry instead of failing the whole record.
fn lenient_index<'de, D>(d: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(d)?;
    Ok(usize::try_from(raw).unwrap_or(0))
}

impl HistoryLog {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn current(&self) -> Option<&GraphStateSnapshot> {
        self.entries.get(self.index)
    }

    pub fn can_undo(&self) -> bool {
        self.entries.len() > 1 && self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.entries.len() > 1 && self.index < self.entries.len() - 1
    }

    /// Restore `index` into range and `entries` under `limit` (oldest go first).
    /// Used on records read back from storage.
    pub fn normalize(&mut self, limit: usize) {
        let limit = limit.max(1);
        if self.entries.len() > limit {
            let evict = self.entries.len() - limit;
            self.entries.drain(..evict);
            self.index = self.index.saturating_sub(evict);
        }
        if self.entries.is_empty() {
            self.index = 0;
        } else if self.index >= self.entries.len() {
            self.index = self.entries.len() - 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Appended { index: usize, evicted: usize },
    /// Same signature as the current tail.
    Duplicate,
    /// Positional drift under the threshold, nothing else changed.
    Jitter,
}

impl PushOutcome {
    pub fn appended(&self) -> bool {
        matches!(self, PushOutcome::Appended { .. })
    }
}

/// Result of `undo`/`redo`. `Exhausted` means nothing moved; callers leave
/// their live state alone.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryMove {
    Moved(GraphStateSnapshot),
    Exhausted,
}

impl HistoryMove {
    pub fn snapshot(&self) -> Option<&GraphStateSnapshot> {
        match self {
            HistoryMove::Moved(s) => Some(s),
            HistoryMove::Exhausted => None,
        }
    }
}

pub fn record_key(file_key: &str) -> String {
    format!("history::{file_key}")
}

pub struct HistoryStore {
    cfg: HistoryConfig,
    gateway: Arc<dyn PersistenceGateway>,
    clock: Arc<dyn Clock>,
    logs: HashMap<String, HistoryLog>,
    pending: WriteCoalescer<Value>,
    degraded: HashSet<String>,
}

impl HistoryStore {
    pub fn new(
        cfg: HistoryConfig,
        gateway: Arc<dyn PersistenceGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let pending = WriteCoalescer::new(cfg.debounce_ms);
        Self {
            cfg,
            gateway,
            clock,
            logs: HashMap::new(),
            pending,
            degraded: HashSet::new(),
        }
    }

    /// Hydrate `file_key` from storage unless it is already in memory.
    /// Returns true if a stored log was found. A missing, unreadable or corrupt
    /// record leaves the key empty.
    pub fn load(&mut self, file_key: &str) -> bool {
        if self.logs.contains_key(file_key) {
            return true;
        }
        let key = record_key(file_key);
        let stored = match self.gateway.get(&key) {
            Ok(v) => v,
            Err(e) => {
                self.note_failure(file_key, "load", &e);
                None
            }
        };
        let Some(value) = stored else {
            return false;
        };
        match serde_json::from_value::<HistoryLog>(value) {
            Ok(mut log) => {
                log.normalize(self.cfg.limit);
                if log.is_empty() {
                    return false;
                }
                tracing::info!(file = file_key, entries = log.len(), index = log.index, "history restored");
                self.logs.insert(file_key.to_string(), log);
                true
            }
            Err(e) => {
                tracing::warn!(file = file_key, error = %e, "stored history unreadable; starting fresh");
                false
            }
        }
    }

    /// Baseline for a freshly opened file. No-op once the log has entries.
    pub fn ensure_initial(&mut self, file_key: &str, entry: GraphStateSnapshot) -> bool {
        let log = self.logs.entry(file_key.to_string()).or_default();
        if !log.is_empty() {
            return false;
        }
        log.entries.push(entry);
        log.index = 0;
        self.schedule(file_key);
        true
    }

    pub fn push(&mut self, file_key: &str, entry: GraphStateSnapshot) -> PushOutcome {
        let limit = self.cfg.limit.max(1);
        let sample = self.cfg.signature_sample;
        let threshold = self.cfg.jitter_threshold;

        let log = self.logs.entry(file_key.to_string()).or_default();

        let mut cut = false;
        if !log.is_empty() && log.index < log.entries.len() - 1 {
            log.entries.truncate(log.index + 1);
            cut = true;
        }

        let skipped = match log.entries.last() {
            Some(last) if signature(last, sample) == signature(&entry, sample) => {
                Some(PushOutcome::Duplicate)
            }
            Some(last) if is_near_no_op(last, &entry, threshold) => Some(PushOutcome::Jitter),
            _ => None,
        };
        if let Some(outcome) = skipped {
            tracing::debug!(file = file_key, ?outcome, "history push skipped");
            if cut {
                self.schedule(file_key);
            }
            return outcome;
        }

        log.entries.push(entry);
        let mut evicted = 0;
        while log.entries.len() > limit {
            log.entries.remove(0);
            evicted += 1;
        }
        log.index = log.entries.len() - 1;
        let index = log.index;

        tracing::debug!(file = file_key, index, evicted, branch_cut = cut, "history entry appended");
        self.schedule(file_key);
        PushOutcome::Appended { index, evicted }
    }

    pub fn undo(&mut self, file_key: &str) -> HistoryMove {
        let Some(log) = self.logs.get_mut(file_key) else {
            return HistoryMove::Exhausted;
        };
        if log.is_empty() || log.index == 0 {
            return HistoryMove::Exhausted;
        }
        log.index -= 1;
        let entry = log.entries[log.index].clone();
        self.write_now(file_key);
        HistoryMove::Moved(entry)
    }

    pub fn redo(&mut self, file_key: &str) -> HistoryMove {
        let Some(log) = self.logs.get_mut(file_key) else {
            return HistoryMove::Exhausted;
        };
        if log.is_empty() || log.index + 1 >= log.entries.len() {
            return HistoryMove::Exhausted;
        }
        log.index += 1;
        let entry = log.entries[log.index].clone();
        self.write_now(file_key);
        HistoryMove::Moved(entry)
    }

    pub fn can_undo(&self, file_key: &str) -> bool {
        self.logs.get(file_key).map(HistoryLog::can_undo).unwrap_or(false)
    }

    pub fn can_redo(&self, file_key: &str) -> bool {
        self.logs.get(file_key).map(HistoryLog::can_redo).unwrap_or(false)
    }

    pub fn log(&self, file_key: &str) -> Option<&HistoryLog> {
        self.logs.get(file_key)
    }

    pub fn current(&self, file_key: &str) -> Option<&GraphStateSnapshot> {
        self.logs.get(file_key).and_then(HistoryLog::current)
    }

    pub fn len(&self, file_key: &str) -> usize {
        self.logs.get(file_key).map(HistoryLog::len).unwrap_or(0)
    }

    pub fn index(&self, file_key: &str) -> Option<usize> {
        self.logs
            .get(file_key)
            .filter(|l| !l.is_empty())
            .map(|l| l.index)
    }

    /// Drop the log from memory, the write queue and storage.
    pub fn clear(&mut self, file_key: &str) {
        self.logs.remove(file_key);
        self.pending.cancel(file_key);
        if let Err(e) = self.gateway.remove(&record_key(file_key)) {
            self.note_failure(file_key, "clear", &e);
        } else {
            tracing::info!(file = file_key, "history cleared");
        }
    }

    /// True when the last write for `file_key` failed.
    pub fn is_degraded(&self, file_key: &str) -> bool {
        self.degraded.contains(file_key)
    }

    /// Queued payload for `file_key`, if its window has not elapsed yet.
    pub fn pending(&self, file_key: &str) -> Option<&Value> {
        self.pending.get(file_key)
    }

    pub fn next_flush_due(&self) -> Option<i64> {
        self.pending.next_due()
    }

    /// Write every queued payload whose coalescing window has elapsed.
    pub fn flush_due(&mut self) -> usize {
        let due = self.pending.take_due(self.clock.now_ms());
        self.write_all(due)
    }

    /// Write everything queued, due or not.
    pub fn flush_all(&mut self) -> usize {
        let all = self.pending.drain();
        self.write_all(all)
    }

    // ---------- internals ----------

    fn encode(&self, file_key: &str) -> Option<Value> {
        let log = self.logs.get(file_key)?;
        match serde_json::to_value(log) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(file = file_key, error = %e, "history not serializable; kept in memory only");
                None
            }
        }
    }

    fn schedule(&mut self, file_key: &str) {
        let Some(value) = self.encode(file_key) else {
            self.degraded.insert(file_key.to_string());
            return;
        };
        let now = self.clock.now_ms();
        if self.pending.schedule(file_key, value, now) {
            tracing::debug!(file = file_key, "coalesced pending history write");
        }
    }

    fn write_now(&mut self, file_key: &str) {
        self.pending.cancel(file_key);
        let Some(value) = self.encode(file_key) else {
            self.degraded.insert(file_key.to_string());
            return;
        };
        self.put(file_key, &value);
    }

    fn write_all(&mut self, batch: Vec<(String, Value)>) -> usize {
        let mut written = 0;
        for (file_key, value) in batch {
            if self.put(&file_key, &value) {
                written += 1;
            }
        }
        written
    }

    fn put(&mut self, file_key: &str, value: &Value) -> bool {
        match self.gateway.put(&record_key(file_key), value) {
            Ok(()) => {
                self.degraded.remove(file_key);
                true
            }
            Err(e) => {
                self.note_failure(file_key, "write", &e);
                false
            }
        }
    }

    fn note_failure(&mut self, file_key: &str, op: &str, e: &GatewayError) {
        tracing::warn!(file = file_key, op, error = %e, "history persistence failed; continuing in memory");
        self.degraded.insert(file_key.to_string());
    }
}

impl Drop for HistoryStore {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            self.flush_all();
        }
    }
}
