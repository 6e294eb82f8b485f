// lineage-core/src/commands/session.rs
//! Per-file view session: the mutators and read models the UI binds to.
//!
//! Every mutator edits the live view, builds a fresh snapshot and pushes it
//! into history. When history records the push, the node record map is
//! queued for writing too; the live filters get their own `view::F` record
//! so filter-only edits survive a reload. `undo`/`redo` replay the selected
//! entry into the live view and the record map.
//!
//! Nothing here spawns a timer. History, node record and view writes sit in
//! per-file queues until the host calls `flush_due` from its event loop
//! (`next_flush_due` says when), or `flush` on file switch and shutdown.
//! Dropping the session flushes whatever is still queued.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::config::CoreConfig;
use crate::graph::filter::{BoundedFilter, ColumnFilters, FilterOutcome};
use crate::graph::lineage::LineageGraph;
use crate::graph::neighborhood::{NeighborhoodResolver, NeighborhoodSelection};
use crate::graph::relation::{NodeId, Relation, filter_options};
use crate::memory::history::{HistoryMove, HistoryStore, PushOutcome};
use crate::memory::snapshot::{
    GraphStateSnapshot, LayoutDirection, Position, Positions, SnapshotInput, make_snapshot,
};
use crate::services::gateway::PersistenceGateway;
use crate::services::layout::{Layout, merge_layout};
use crate::services::positions::{PositionCache, ViewRecord, build_records};
use crate::utils::clock::Clock;

/// One open file's view. Writes are queued, not timed: the host drives them
/// by calling `flush_due` whenever `next_flush_due` has passed, and `flush`
/// before switching files or exiting.
pub struct Session {
    file_key: String,
    relations: Vec<Relation>,
    graph: LineageGraph,
    filter: BoundedFilter,
    precision: u32,
    history: HistoryStore,
    cache: PositionCache,
    clock: Arc<dyn Clock>,
    /// Coordinates read back from storage at open.
    known: Positions,
    positions: Positions,
    hidden: BTreeSet<NodeId>,
    filters: ColumnFilters,
    layout_direction: LayoutDirection,
    neighborhood: NeighborhoodSelection,
    /// Filters as last queued to the view record.
    saved_filters: ColumnFilters,
}

impl Session {
    /// Load `relations` for `file_key`: rebuild the graph, restore stored
    /// history and positions, and make sure history has a baseline entry.
    pub fn open(
        config: &CoreConfig,
        gateway: Arc<dyn PersistenceGateway>,
        clock: Arc<dyn Clock>,
        file_key: &str,
        relations: Vec<Relation>,
    ) -> Self {
        let graph = LineageGraph::from_relations(&relations);
        let mut history = HistoryStore::new(config.history.clone(), gateway.clone(), clock.clone());
        let mut cache = PositionCache::new(gateway, clock.clone(), config.history.debounce_ms);

        let restored = history.load(file_key);
        let known = cache.known_positions(file_key);
        let view = cache.read_view(file_key);
        tracing::info!(
            file = file_key,
            relations = relations.len(),
            nodes = graph.node_count(),
            restored,
            known_positions = known.len(),
            "session opened"
        );

        let mut session = Self {
            file_key: file_key.to_string(),
            relations,
            graph,
            filter: BoundedFilter::from_config(&config.filter),
            precision: config.history.precision,
            history,
            cache,
            clock,
            positions: known.clone(),
            known,
            hidden: BTreeSet::new(),
            filters: ColumnFilters::new(),
            layout_direction: LayoutDirection::default(),
            neighborhood: NeighborhoodSelection::default(),
            saved_filters: ColumnFilters::new(),
        };

        let current = session.history.current(file_key).cloned();
        if let Some(entry) = &current {
            session.restore(entry);
        }
        // A view record at least as new as the current entry holds the live filters.
        if let Some(view) = view {
            let entry_ts = current.as_ref().map(|e| e.timestamp).unwrap_or(i64::MIN);
            if view.saved_at >= entry_ts {
                session.filters = view.filters;
            }
        }
        session.saved_filters = session.filters.clone();

        let baseline = session.snapshot();
        session.history.ensure_initial(file_key, baseline);
        session.schedule_records();
        session
    }

    // ---------- read models ----------

    pub fn file_key(&self) -> &str {
        &self.file_key
    }

    pub fn graph(&self) -> &LineageGraph {
        &self.graph
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn positions(&self) -> &Positions {
        &self.positions
    }

    pub fn hidden(&self) -> &BTreeSet<NodeId> {
        &self.hidden
    }

    pub fn filters(&self) -> &ColumnFilters {
        &self.filters
    }

    pub fn layout_direction(&self) -> LayoutDirection {
        self.layout_direction
    }

    pub fn neighborhood(&self) -> &NeighborhoodSelection {
        &self.neighborhood
    }

    pub fn filter_options(&self) -> BTreeMap<String, BTreeSet<String>> {
        filter_options(&self.relations)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo(&self.file_key)
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo(&self.file_key)
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// "Your last action might not be saved."
    pub fn is_degraded(&self) -> bool {
        self.history.is_degraded(&self.file_key) || self.cache.is_degraded()
    }

    /// Rows to render: hidden nodes removed, filters and neighborhood applied,
    /// held to the node/edge budget.
    pub fn visible(&self) -> FilterOutcome {
        let closure = self
            .neighborhood
            .is_active()
            .then_some(&self.neighborhood.closure);
        if self.hidden.is_empty() {
            return self.filter.apply(&self.relations, &self.filters, closure);
        }
        let rows: Vec<Relation> = self
            .relations
            .iter()
            .filter(|r| !self.hidden.contains(&r.parent_id) && !self.hidden.contains(&r.child_id))
            .cloned()
            .collect();
        self.filter.apply(&rows, &self.filters, closure)
    }

    /// The live view as a snapshot value.
    pub fn snapshot(&self) -> GraphStateSnapshot {
        make_snapshot(SnapshotInput {
            known: &self.known,
            live: &self.positions,
            hidden: &self.hidden,
            filters: &self.filters,
            layout_direction: self.layout_direction,
            neighborhood: &self.neighborhood,
            timestamp: self.clock.now_ms(),
            precision: self.precision,
        })
    }

    // ---------- mutators ----------

    pub fn move_nodes<I>(&mut self, moves: I) -> PushOutcome
    where
        I: IntoIterator<Item = (NodeId, Position)>,
    {
        for (id, p) in moves {
            if p.is_finite() {
                self.positions.insert(id, p);
            }
        }
        self.commit()
    }

    pub fn hide<I>(&mut self, ids: I) -> PushOutcome
    where
        I: IntoIterator<Item = NodeId>,
    {
        self.hidden.extend(ids);
        self.commit()
    }

    pub fn unhide<I>(&mut self, ids: I) -> PushOutcome
    where
        I: IntoIterator<Item = NodeId>,
    {
        for id in ids {
            self.hidden.remove(&id);
        }
        self.commit()
    }

    pub fn unhide_all(&mut self) -> PushOutcome {
        self.hidden.clear();
        self.commit()
    }

    /// Replace the selection for one column. No values clears the column.
    pub fn set_filter<I>(&mut self, column: &str, values: I) -> PushOutcome
    where
        I: IntoIterator<Item = String>,
    {
        let values: BTreeSet<String> = values.into_iter().collect();
        if values.is_empty() {
            self.filters.remove(column);
        } else {
            self.filters.insert(column.to_string(), values);
        }
        self.commit()
    }

    pub fn clear_filters(&mut self) -> PushOutcome {
        self.filters.clear();
        self.commit()
    }

    pub fn set_layout_direction(&mut self, direction: LayoutDirection) -> PushOutcome {
        self.layout_direction = direction;
        self.commit()
    }

    pub fn select_neighborhood<I>(&mut self, seeds: I) -> PushOutcome
    where
        I: IntoIterator<Item = NodeId>,
    {
        let seeds: Vec<NodeId> = seeds.into_iter().collect();
        self.neighborhood = NeighborhoodResolver::new(&self.graph).select(seeds.iter());
        tracing::debug!(
            file = %self.file_key,
            seeds = self.neighborhood.seed.len(),
            closure = self.neighborhood.closure.len(),
            "neighborhood selected"
        );
        self.commit()
    }

    pub fn clear_neighborhood(&mut self) -> PushOutcome {
        self.neighborhood = NeighborhoodSelection::default();
        self.commit()
    }

    /// Run `engine` over the visible graph and commit the result.
    pub fn apply_layout(&mut self, engine: &dyn Layout) -> PushOutcome {
        let (nodes, edges) = self.visible_graph();
        let result = engine.layout(&nodes, &edges, self.layout_direction);
        self.accept_layout_for(&nodes, result)
    }

    /// Commit a layout computed elsewhere (e.g. on a worker) for the visible graph.
    pub fn accept_layout(
        &mut self,
        result: anyhow::Result<HashMap<NodeId, Position>>,
    ) -> PushOutcome {
        let (nodes, _) = self.visible_graph();
        self.accept_layout_for(&nodes, result)
    }

    pub fn undo(&mut self) -> HistoryMove {
        let step = self.history.undo(&self.file_key);
        self.replay(&step);
        step
    }

    pub fn redo(&mut self) -> HistoryMove {
        let step = self.history.redo(&self.file_key);
        self.replay(&step);
        step
    }

    /// Forget history and stored positions for this file. The live view stays
    /// and becomes the new baseline.
    pub fn clear_history(&mut self) {
        self.history.clear(&self.file_key);
        self.cache.clear(&self.file_key);
        let baseline = self.snapshot();
        self.history.ensure_initial(&self.file_key, baseline);
        self.saved_filters = self.filters.clone();
        self.schedule_records();
    }

    /// Write every queued record whose coalescing window has elapsed.
    /// Returns the number of records written.
    pub fn flush_due(&mut self) -> usize {
        self.history.flush_due() + self.cache.flush_due()
    }

    /// Write everything queued, due or not.
    pub fn flush(&mut self) -> usize {
        self.history.flush_all() + self.cache.flush_all()
    }

    /// Earliest deadline among queued writes, in clock milliseconds.
    pub fn next_flush_due(&self) -> Option<i64> {
        match (self.history.next_flush_due(), self.cache.next_flush_due()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// True while any write for this file is still queued.
    pub fn has_pending_writes(&self) -> bool {
        self.history.pending(&self.file_key).is_some() || self.cache.pending(&self.file_key)
    }

    // ---------- internals ----------

    fn commit(&mut self) -> PushOutcome {
        let snap = self.snapshot();
        let outcome = self.history.push(&self.file_key, snap);
        if outcome.appended() {
            self.schedule_records();
        }
        self.schedule_view();
        outcome
    }

    fn replay(&mut self, step: &HistoryMove) {
        if let HistoryMove::Moved(entry) = step {
            self.restore(entry);
            self.schedule_records();
            self.schedule_view();
        }
    }

    fn restore(&mut self, entry: &GraphStateSnapshot) {
        let mut positions = self.known.clone();
        positions.extend(entry.positions.iter().map(|(k, v)| (k.clone(), *v)));
        self.positions = positions;
        self.hidden = entry.hidden.clone();
        self.filters = entry.filters.clone();
        self.layout_direction = entry.layout_direction;
        self.neighborhood = entry.neighborhood();
    }

    fn schedule_records(&mut self) {
        let snap = self.snapshot();
        let visible = self.visible().nodes;
        let records = build_records(&self.graph, &snap, &visible);
        self.cache.schedule(&self.file_key, &records);
    }

    fn schedule_view(&mut self) {
        if self.filters == self.saved_filters {
            return;
        }
        let view = ViewRecord {
            filters: self.filters.clone(),
            saved_at: self.clock.now_ms(),
        };
        self.cache.schedule_view(&self.file_key, &view);
        self.saved_filters = self.filters.clone();
    }

    fn visible_graph(&self) -> (Vec<NodeId>, Vec<(NodeId, NodeId)>) {
        let outcome = self.visible();
        let nodes: Vec<NodeId> = outcome.nodes.into_iter().collect();
        let edges = outcome
            .relations
            .into_iter()
            .map(|r| (r.parent_id, r.child_id))
            .collect();
        (nodes, edges)
    }

    fn accept_layout_for(
        &mut self,
        nodes: &[NodeId],
        result: anyhow::Result<HashMap<NodeId, Position>>,
    ) -> PushOutcome {
        let laid = merge_layout(result, nodes, &self.positions);
        self.positions.extend(laid);
        self.commit()
    }
}
