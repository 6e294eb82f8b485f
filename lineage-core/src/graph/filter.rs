//! graph/filter.rs
//!
//! Narrows the loaded rows to what the view should render, then holds the
//! result to a node/edge budget.
//!
//! Order of policy:
//! 1. Active closure: a row survives only if both endpoints are closure
//!    members. Endpoint-scoped column filters (type/level matching) are
//!    skipped here because the closure already fixes the node set; row-scoped
//!    filters (relationship kind, plain extra columns) still AND in.
//! 2. No closure: every non-empty column filter must pass (AND across
//!    columns, OR within a column, either endpoint for endpoint columns).
//! 3. Too many nodes: rank by degree within the survivors, keep the top
//!    `floor(max_items * retention_ratio)`, drop rows touching the rest.
//! 4. Still too many rows: truncate the row list. Lossy on purpose.
//!
//! Nothing here fails; callers get `FilterOutcome::truncation` instead.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use super::relation::{NodeId, Relation};
use crate::config::FilterConfig;

/// Column name -> selected values. An empty set means "no restriction".
pub type ColumnFilters = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Clone, Copy)]
pub struct BoundedFilter {
    pub max_items: usize,
    pub retention_ratio: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FilterOutcome {
    pub relations: Vec<Relation>,
    /// Endpoints of `relations`.
    pub nodes: BTreeSet<NodeId>,
    /// Rows and nodes that passed the filters before any budget cut.
    pub matched_relations: usize,
    pub matched_nodes: usize,
    pub truncation: Option<Truncation>,
}

impl FilterOutcome {
    pub fn is_truncated(&self) -> bool {
        self.truncation.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Truncation {
    pub nodes_dropped: usize,
    pub relations_dropped: usize,
    /// Step 4 fired: rows between kept nodes were cut as well.
    pub hard_cut: bool,
}

impl Default for BoundedFilter {
    fn default() -> Self {
        Self::from_config(&FilterConfig::default())
    }
}

impl BoundedFilter {
    pub fn new(max_items: usize) -> Self {
        Self {
            max_items,
            ..Self::default()
        }
    }

    pub fn from_config(cfg: &FilterConfig) -> Self {
        Self {
            max_items: cfg.max_items,
            retention_ratio: cfg.retention_ratio,
        }
    }

    pub fn apply(
        &self,
        relations: &[Relation],
        filters: &ColumnFilters,
        closure: Option<&BTreeSet<NodeId>>,
    ) -> FilterOutcome {
        let closure = closure.filter(|c| !c.is_empty());

        let survivors: Vec<&Relation> = relations
            .iter()
            .filter(|r| r.is_edge())
            .filter(|r| match closure {
                Some(c) => {
                    c.contains(&r.parent_id)
                        && c.contains(&r.child_id)
                        && passes(r, filters, true)
                }
                None => passes(r, filters, false),
            })
            .collect();

        let matched_relations = survivors.len();
        let matched = endpoints(survivors.iter().copied());
        let matched_nodes = matched.len();

        if matched_nodes <= self.max_items && matched_relations <= self.max_items {
            return FilterOutcome {
                relations: survivors.into_iter().cloned().collect(),
                nodes: matched.into_iter().map(str::to_string).collect(),
                matched_relations,
                matched_nodes,
                truncation: None,
            };
        }

        let mut kept_rows = survivors;
        if matched_nodes > self.max_items {
            let keep = self.retained_node_count();
            let kept = rank_by_degree(&kept_rows, keep);
            kept_rows.retain(|r| {
                kept.contains(r.parent_id.as_str()) && kept.contains(r.child_id.as_str())
            });
            tracing::debug!(
                matched_nodes,
                keep,
                rows = kept_rows.len(),
                "node budget exceeded; kept highest-degree nodes"
            );
        }

        let hard_cut = kept_rows.len() > self.max_items;
        if hard_cut {
            tracing::debug!(
                rows = kept_rows.len(),
                max = self.max_items,
                "row budget exceeded; truncating"
            );
            kept_rows.truncate(self.max_items);
        }

        let relations: Vec<Relation> = kept_rows.into_iter().cloned().collect();
        let nodes: BTreeSet<NodeId> = endpoints(relations.iter())
            .into_iter()
            .map(str::to_string)
            .collect();

        FilterOutcome {
            truncation: Some(Truncation {
                nodes_dropped: matched_nodes - nodes.len(),
                relations_dropped: matched_relations - relations.len(),
                hard_cut,
            }),
            relations,
            nodes,
            matched_relations,
            matched_nodes,
        }
    }

    fn retained_node_count(&self) -> usize {
        (self.max_items as f64 * self.retention_ratio).floor() as usize
    }
}

/// One-shot form with the default retention ratio.
pub fn apply(
    relations: &[Relation],
    filters: &ColumnFilters,
    closure: Option<&BTreeSet<NodeId>>,
    max_items: usize,
) -> FilterOutcome {
    BoundedFilter::new(max_items).apply(relations, filters, closure)
}

fn passes(r: &Relation, filters: &ColumnFilters, closure_active: bool) -> bool {
    filters.iter().all(|(column, selected)| {
        if selected.is_empty() {
            return true;
        }
        let values = r.column(column);
        if closure_active && values.is_endpoint() {
            return true;
        }
        values.matches(selected)
    })
}

fn endpoints<'a, I>(rows: I) -> HashSet<&'a str>
where
    I: Iterator<Item = &'a Relation>,
{
    let mut out = HashSet::new();
    for r in rows {
        out.insert(r.parent_id.as_str());
        out.insert(r.child_id.as_str());
    }
    out
}

/// Top `keep` nodes by in+out degree over `rows`. Ties go to the
/// lexically smaller id so the cut is the same regardless of row order.
fn rank_by_degree<'a>(rows: &[&'a Relation], keep: usize) -> HashSet<&'a str> {
    let mut degree: HashMap<&'a str, usize> = HashMap::new();
    for r in rows {
        *degree.entry(r.parent_id.as_str()).or_insert(0) += 1;
        *degree.entry(r.child_id.as_str()).or_insert(0) += 1;
    }
    let mut ranked: Vec<(&'a str, usize)> = degree.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(keep);
    ranked.into_iter().map(|(id, _)| id).collect()
}
