//! memory/signature.rs
//!
//! Cheap equality tests used by `HistoryStore::push` to keep one history
//! entry per deliberate action.
//!
//! - `signature`: blake3 over a compact canonical description of a snapshot
//!   (counts, filter shape, layout, closure, coarse sample of positions).
//!   Equal signatures = duplicate push.
//! - `is_near_no_op`: total positional drift under a threshold with the
//!   same layout, hidden count and closure = jitter.

use serde::Serialize;
use std::collections::BTreeSet;

use super::snapshot::{GraphStateSnapshot, Position};

#[derive(Serialize)]
struct SignatureParts<'a> {
    positions: usize,
    hidden: usize,
    filters: Vec<(&'a str, usize)>,
    layout: &'a str,
    closure: &'a BTreeSet<String>,
    sample: Vec<(&'a str, i64, i64)>,
}

/// Hex digest identifying a snapshot up to the precision the history cares
/// about. `sample` caps how many (sorted) node positions feed the digest.
pub fn signature(s: &GraphStateSnapshot, sample: usize) -> String {
    let parts = SignatureParts {
        positions: s.positions.len(),
        hidden: s.hidden.len(),
        filters: s
            .filters
            .iter()
            .map(|(k, v)| (k.as_str(), v.len()))
            .collect(),
        layout: s.layout_direction.as_str(),
        closure: &s.neighborhood_closure,
        sample: s
            .positions
            .iter()
            .take(sample)
            .map(|(id, p)| (id.as_str(), coarse(p.x), coarse(p.y)))
            .collect(),
    };
    let canonical = serde_json::to_vec(&parts).unwrap_or_default();
    blake3::hash(&canonical).to_hex().to_string()
}

fn coarse(v: f64) -> i64 {
    if v.is_finite() { v.round() as i64 } else { 0 }
}

/// Sum of |dx| + |dy| across the union of both position maps. A node missing
/// on one side counts as sitting at the origin there.
pub fn positional_delta(a: &GraphStateSnapshot, b: &GraphStateSnapshot) -> f64 {
    let origin = Position::default();
    let keys: BTreeSet<&String> = a.positions.keys().chain(b.positions.keys()).collect();
    keys.into_iter()
        .map(|k| {
            let pa = a.positions.get(k).unwrap_or(&origin);
            let pb = b.positions.get(k).unwrap_or(&origin);
            (pa.x - pb.x).abs() + (pa.y - pb.y).abs()
        })
        .sum()
}

pub fn is_near_no_op(prev: &GraphStateSnapshot, next: &GraphStateSnapshot, threshold: f64) -> bool {
    prev.layout_direction == next.layout_direction
        && prev.hidden.len() == next.hidden.len()
        && prev.neighborhood_closure == next.neighborhood_closure
        && positional_delta(prev, next) < threshold
}
