//! services/layout.rs
//!
//! Seam for the external layout engine. The engine may fail or be slow;
//! hosts that run it off-thread hand the result to `merge_layout` when it
//! arrives. A failed or partial result never clears coordinates: missing
//! nodes keep their prior position, or sit at the origin if they never had one.

use anyhow::Result;
use std::collections::HashMap;

use crate::graph::relation::NodeId;
use crate::memory::snapshot::{LayoutDirection, Position, Positions};

pub trait Layout {
    fn layout(
        &self,
        nodes: &[NodeId],
        edges: &[(NodeId, NodeId)],
        direction: LayoutDirection,
    ) -> Result<HashMap<NodeId, Position>>;
}

impl<F> Layout for F
where
    F: Fn(&[NodeId], &[(NodeId, NodeId)], LayoutDirection) -> Result<HashMap<NodeId, Position>>,
{
    fn layout(
        &self,
        nodes: &[NodeId],
        edges: &[(NodeId, NodeId)],
        direction: LayoutDirection,
    ) -> Result<HashMap<NodeId, Position>> {
        self(nodes, edges, direction)
    }
}

/// Positions for `nodes`: the engine's when finite, else prior, else origin.
pub fn merge_layout(
    result: Result<HashMap<NodeId, Position>>,
    nodes: &[NodeId],
    prior: &Positions,
) -> Positions {
    let computed = match result {
        Ok(map) => map,
        Err(e) => {
            tracing::warn!(error = %e, nodes = nodes.len(), "layout failed; keeping prior positions");
            HashMap::new()
        }
    };
    nodes
        .iter()
        .map(|id| {
            let p = computed
                .get(id)
                .filter(|p| p.is_finite())
                .or_else(|| prior.get(id))
                .copied()
                .unwrap_or_default();
            (id.clone(), p)
        })
        .collect()
}
