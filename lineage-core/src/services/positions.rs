//! services/positions.rs
//!
//! Live-position cache. Queues the per-file node record map
//! `{id, x, y, parents, children, hidden, filteredOut}` and the live view
//! record for coalesced writes through the gateway, and reads stored
//! coordinates and filters back after a reload. The record shape is
//! stable across versions; unknown fields are ignored on read.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::graph::filter::ColumnFilters;
use crate::graph::lineage::LineageGraph;
use crate::graph::relation::NodeId;
use crate::memory::snapshot::{GraphStateSnapshot, Position, Positions};
use crate::services::gateway::PersistenceGateway;
use crate::utils::clock::Clock;
use crate::utils::coalesce::WriteCoalescer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub id: NodeId,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub parents: Vec<NodeId>,
    #[serde(default)]
    pub children: Vec<NodeId>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub filtered_out: bool,
}

pub type NodeRecordMap = BTreeMap<NodeId, NodeRecord>;

pub fn record_key(file_key: &str) -> String {
    format!("positions::{file_key}")
}

/// One record per graph node, plus records for stale positioned ids the
/// graph no longer has (kept so their coordinates survive). `visible` is the
/// node set currently rendered; everything else is `filteredOut`.
pub fn build_records(
    graph: &LineageGraph,
    snapshot: &GraphStateSnapshot,
    visible: &BTreeSet<NodeId>,
) -> NodeRecordMap {
    let mut out = NodeRecordMap::new();
    for id in graph.all_nodes() {
        let p = snapshot.positions.get(id).copied().unwrap_or_default();
        let mut parents: Vec<NodeId> = graph.parents_of(id).iter().cloned().collect();
        let mut children: Vec<NodeId> = graph.children_of(id).iter().cloned().collect();
        parents.sort();
        children.sort();
        out.insert(
            id.clone(),
            NodeRecord {
                id: id.clone(),
                x: p.x,
                y: p.y,
                parents,
                children,
                hidden: snapshot.hidden.contains(id),
                filtered_out: !visible.contains(id),
            },
        );
    }
    for (id, p) in &snapshot.positions {
        out.entry(id.clone()).or_insert_with(|| NodeRecord {
            id: id.clone(),
            x: p.x,
            y: p.y,
            parents: Vec::new(),
            children: Vec::new(),
            hidden: snapshot.hidden.contains(id),
            filtered_out: true,
        });
    }
    out
}

/// Live view state that history may not capture (filter-only edits are
/// jitter as far as history is concerned). Stored under `view::F`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRecord {
    #[serde(default)]
    pub filters: ColumnFilters,
    #[serde(default)]
    pub saved_at: i64,
}

pub fn view_key(file_key: &str) -> String {
    format!("view::{file_key}")
}

/// Node records and view records for every open file. Writes are queued
/// per record key and land when `flush_due` sees their window elapse, or on
/// `flush_all`/drop.
pub struct PositionCache {
    gateway: Arc<dyn PersistenceGateway>,
    clock: Arc<dyn Clock>,
    pending: WriteCoalescer<Value>,
    degraded: bool,
}

impl PositionCache {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, clock: Arc<dyn Clock>, window_ms: u64) -> Self {
        Self {
            gateway,
            clock,
            pending: WriteCoalescer::new(window_ms),
            degraded: false,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Queue the node record map for `file_key`, replacing any queued one.
    pub fn schedule(&mut self, file_key: &str, records: &NodeRecordMap) {
        self.enqueue(file_key, record_key(file_key), records);
    }

    pub fn schedule_view(&mut self, file_key: &str, view: &ViewRecord) {
        self.enqueue(file_key, view_key(file_key), view);
    }

    pub fn pending(&self, file_key: &str) -> bool {
        self.pending.get(&record_key(file_key)).is_some()
            || self.pending.get(&view_key(file_key)).is_some()
    }

    pub fn next_flush_due(&self) -> Option<i64> {
        self.pending.next_due()
    }

    pub fn flush_due(&mut self) -> usize {
        let due = self.pending.take_due(self.clock.now_ms());
        self.put_all(due)
    }

    pub fn flush_all(&mut self) -> usize {
        let all = self.pending.drain();
        self.put_all(all)
    }

    pub fn read(&mut self, file_key: &str) -> NodeRecordMap {
        self.fetch(file_key, &record_key(file_key)).unwrap_or_default()
    }

    /// Stored coordinates, skipping non-finite values.
    pub fn known_positions(&mut self, file_key: &str) -> Positions {
        self.read(file_key)
            .into_iter()
            .map(|(id, r)| (id, Position::new(r.x, r.y)))
            .filter(|(_, p)| p.is_finite())
            .collect()
    }

    pub fn read_view(&mut self, file_key: &str) -> Option<ViewRecord> {
        self.fetch(file_key, &view_key(file_key))
    }

    /// Drop queued and stored records for `file_key`.
    pub fn clear(&mut self, file_key: &str) {
        for key in [record_key(file_key), view_key(file_key)] {
            self.pending.cancel(&key);
            if let Err(e) = self.gateway.remove(&key) {
                tracing::warn!(file = file_key, key = %key, error = %e, "position cache clear failed");
                self.degraded = true;
            }
        }
    }

    fn enqueue<T: Serialize>(&mut self, file_key: &str, key: String, record: &T) {
        match serde_json::to_value(record) {
            Ok(value) => {
                let now = self.clock.now_ms();
                self.pending.schedule(&key, value, now);
            }
            Err(e) => {
                tracing::warn!(file = file_key, key = %key, error = %e, "record not serializable");
                self.degraded = true;
            }
        }
    }

    fn fetch<T: DeserializeOwned>(&mut self, file_key: &str, key: &str) -> Option<T> {
        let stored = match self.gateway.get(key) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(file = file_key, key, error = %e, "position cache unreadable");
                self.degraded = true;
                None
            }
        };
        match serde_json::from_value(stored?) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(file = file_key, key, error = %e, "stored record malformed; ignoring");
                None
            }
        }
    }

    fn put_all(&mut self, batch: Vec<(String, Value)>) -> usize {
        let mut written = 0;
        for (key, value) in batch {
            match self.gateway.put(&key, &value) {
                Ok(()) => {
                    self.degraded = false;
                    written += 1;
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "position cache write failed; continuing in memory");
                    self.degraded = true;
                }
            }
        }
        written
    }
}

impl Drop for PositionCache {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            self.flush_all();
        }
    }
}
