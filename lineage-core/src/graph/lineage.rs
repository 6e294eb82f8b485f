//! graph/lineage.rs
//!
//! Directed multigraph over node ids, rebuilt once per loaded file.
//! Edges point parent -> child and may form cycles; every walk below keeps
//! its own visited set.

use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

use super::relation::{NodeId, Relation};

static EMPTY: Lazy<HashSet<NodeId>> = Lazy::new(HashSet::new);

#[derive(Debug, Clone, Default)]
pub struct LineageGraph {
    children: HashMap<NodeId, HashSet<NodeId>>,
    parents: HashMap<NodeId, HashSet<NodeId>>,
    nodes: HashSet<NodeId>,
    /// Edge multiplicity per node (in + out), duplicates counted.
    degree: HashMap<NodeId, usize>,
}

impl LineageGraph {
    /// Single pass over the rows. Rows with a blank endpoint are skipped.
    pub fn from_relations(relations: &[Relation]) -> Self {
        let mut g = Self::default();
        for r in relations {
            g.add_relation(r);
        }
        g
    }

    pub fn add_relation(&mut self, r: &Relation) {
        if !r.is_edge() {
            return;
        }
        let (p, c) = (r.parent_id.clone(), r.child_id.clone());
        self.nodes.insert(p.clone());
        self.nodes.insert(c.clone());
        self.children.entry(p.clone()).or_default().insert(c.clone());
        self.parents.entry(c.clone()).or_default().insert(p.clone());
        *self.degree.entry(p).or_insert(0) += 1;
        *self.degree.entry(c).or_insert(0) += 1;
    }

    pub fn parents_of(&self, id: &str) -> &HashSet<NodeId> {
        self.parents.get(id).unwrap_or(&EMPTY)
    }

    pub fn children_of(&self, id: &str) -> &HashSet<NodeId> {
        self.children.get(id).unwrap_or(&EMPTY)
    }

    pub fn all_nodes(&self) -> &HashSet<NodeId> {
        &self.nodes
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn degree(&self, id: &str) -> usize {
        self.degree.get(id).copied().unwrap_or(0)
    }

    /// Every node reachable by following parent edges. `id` itself is never
    /// reported, even when it sits on a cycle.
    pub fn ancestors_of(&self, id: &str) -> HashSet<NodeId> {
        self.walk(id, Direction::Up, &HashSet::new())
    }

    /// Every node reachable by following child edges.
    pub fn descendants_of(&self, id: &str) -> HashSet<NodeId> {
        self.walk(id, Direction::Down, &HashSet::new())
    }

    /// Iterative DFS from `start`. Nodes in `skip` are neither reported nor
    /// expanded, which lets a caller fold several walks into one closure
    /// without re-walking what it already has.
    pub(crate) fn walk(
        &self,
        start: &str,
        dir: Direction,
        skip: &HashSet<NodeId>,
    ) -> HashSet<NodeId> {
        let mut found: HashSet<NodeId> = HashSet::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = vec![start];
        visited.insert(start);
        while let Some(cur) = stack.pop() {
            let next = match dir {
                Direction::Up => self.parents_of(cur),
                Direction::Down => self.children_of(cur),
            };
            for n in next {
                if !visited.insert(n.as_str()) {
                    continue;
                }
                if skip.contains(n) {
                    continue;
                }
                found.insert(n.clone());
                stack.push(n.as_str());
            }
        }
        found
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Up,
    Down,
}
