//! memory/snapshot.rs
//!
//! `GraphStateSnapshot` is the unit of undo/redo and of persistence: one
//! complete capture of the view (positions, hidden nodes, filters, layout
//! direction, neighborhood) at a point in time. Edits never mutate a
//! snapshot; they build a new one through `make_snapshot`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::graph::filter::ColumnFilters;
use crate::graph::neighborhood::NeighborhoodSelection;
use crate::graph::relation::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn rounded(&self, digits: u32) -> Self {
        Self {
            x: round_to(self.x, digits),
            y: round_to(self.y, digits),
        }
    }
}

pub type Positions = BTreeMap<NodeId, Position>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LayoutDirection {
    #[default]
    TB,
    BT,
    LR,
    RL,
}

impl LayoutDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutDirection::TB => "TB",
            LayoutDirection::BT => "BT",
            LayoutDirection::LR => "LR",
            LayoutDirection::RL => "RL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TB" => Some(LayoutDirection::TB),
            "BT" => Some(LayoutDirection::BT),
            "LR" => Some(LayoutDirection::LR),
            "RL" => Some(LayoutDirection::RL),
            _ => None,
        }
    }
}

impl fmt::Display for LayoutDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStateSnapshot {
    #[serde(default)]
    pub positions: Positions,
    #[serde(default)]
    pub hidden: BTreeSet<NodeId>,
    #[serde(default)]
    pub filters: ColumnFilters,
    #[serde(default)]
    pub layout_direction: LayoutDirection,
    #[serde(default)]
    pub neighborhood_seed: BTreeSet<NodeId>,
    #[serde(default)]
    pub neighborhood_closure: BTreeSet<NodeId>,
    #[serde(default)]
    pub timestamp: i64,
}

impl GraphStateSnapshot {
    pub fn neighborhood(&self) -> NeighborhoodSelection {
        NeighborhoodSelection::from_parts(
            self.neighborhood_seed.clone(),
            self.neighborhood_closure.clone(),
        )
    }
}

/// Everything `make_snapshot` reads. `known` holds positions remembered from
/// earlier renders (or a reload); `live` is what is on screen right now.
pub struct SnapshotInput<'a> {
    pub known: &'a Positions,
    pub live: &'a Positions,
    pub hidden: &'a BTreeSet<NodeId>,
    pub filters: &'a ColumnFilters,
    pub layout_direction: LayoutDirection,
    pub neighborhood: &'a NeighborhoodSelection,
    pub timestamp: i64,
    pub precision: u32,
}

/// Pure. Live positions win over known ones, so nodes that are off-screen or
/// hidden keep their last coordinates. Non-finite live coordinates are
/// ignored. Empty filter columns are dropped (they mean "no restriction").
pub fn make_snapshot(input: SnapshotInput<'_>) -> GraphStateSnapshot {
    let mut positions: Positions = BTreeMap::new();
    for (id, p) in input.known.iter().chain(input.live.iter()) {
        if p.is_finite() {
            positions.insert(id.clone(), p.rounded(input.precision));
        }
    }

    let filters: ColumnFilters = input
        .filters
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut closure = input.neighborhood.closure.clone();
    closure.extend(input.neighborhood.seed.iter().cloned());

    GraphStateSnapshot {
        positions,
        hidden: input.hidden.clone(),
        filters,
        layout_direction: input.layout_direction,
        neighborhood_seed: input.neighborhood.seed.clone(),
        neighborhood_closure: closure,
        timestamp: input.timestamp,
    }
}

pub fn round_to(v: f64, digits: u32) -> f64 {
    let scale = 10f64.powi(digits as i32);
    let r = (v * scale).round() / scale;
    // Avoid persisting "-0.0".
    if r == 0.0 { 0.0 } else { r }
}
