//! graph/neighborhood.rs
//!
//! Ancestor/descendant closure of a user-picked seed set.
//!
//! Each seed gets two walks (up through parents, down through children), each
//! with its own visited set. A walk does not re-expand a node that an earlier
//! walk in the *same direction* already closed over, so a run stays bounded by
//! |nodes| visits per direction however many seeds share an ancestry.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use super::lineage::{Direction, LineageGraph};
use super::relation::NodeId;

pub struct NeighborhoodResolver<'g> {
    graph: &'g LineageGraph,
}

impl<'g> NeighborhoodResolver<'g> {
    pub fn new(graph: &'g LineageGraph) -> Self {
        Self { graph }
    }

    /// Seeds plus every transitive ancestor and descendant. A seed the graph
    /// does not know contributes only itself.
    pub fn closure_of<'a, I>(&self, seeds: I) -> HashSet<NodeId>
    where
        I: IntoIterator<Item = &'a NodeId>,
    {
        let mut up: HashSet<NodeId> = HashSet::new();
        let mut down: HashSet<NodeId> = HashSet::new();
        let mut out: HashSet<NodeId> = HashSet::new();

        for seed in seeds {
            out.insert(seed.clone());
            if !self.graph.contains(seed) {
                continue;
            }
            if !up.contains(seed) {
                let found = self.graph.walk(seed, Direction::Up, &up);
                up.extend(found);
                up.insert(seed.clone());
            }
            if !down.contains(seed) {
                let found = self.graph.walk(seed, Direction::Down, &down);
                down.extend(found);
                down.insert(seed.clone());
            }
        }

        out.extend(up);
        out.extend(down);
        out
    }

    pub fn select<'a, I>(&self, seeds: I) -> NeighborhoodSelection
    where
        I: IntoIterator<Item = &'a NodeId>,
    {
        let seed: BTreeSet<NodeId> = seeds.into_iter().cloned().collect();
        let closure = self.closure_of(seed.iter()).into_iter().collect();
        NeighborhoodSelection { seed, closure }
    }
}

/// The user's pick and its expansion. `seed` is always a subset of `closure`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NeighborhoodSelection {
    pub seed: BTreeSet<NodeId>,
    pub closure: BTreeSet<NodeId>,
}

impl NeighborhoodSelection {
    /// Rebuild from stored parts, restoring `seed ⊆ closure` if a stored
    /// record lost it.
    pub fn from_parts(seed: BTreeSet<NodeId>, mut closure: BTreeSet<NodeId>) -> Self {
        closure.extend(seed.iter().cloned());
        Self { seed, closure }
    }

    pub fn is_active(&self) -> bool {
        !self.closure.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.closure.contains(id)
    }
}
