//! graph/relation.rs
//!
//! One parsed input row: a directed parent -> child edge plus whatever extra
//! columns the source table carried. Rows are immutable once loaded; filtering
//! only narrows which rows are visible.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type NodeId = String;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub parent_id: NodeId,
    pub child_id: NodeId,
    #[serde(default)]
    pub parent_type: String,
    #[serde(default)]
    pub child_type: String,
    #[serde(default)]
    pub relationship_kind: String,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, String>,
}

/// Which side of an edge a column value describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Parent,
    Child,
}

/// Values a row exposes for one filter column. Blank cells are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnValues<'a> {
    /// Column describes the endpoints (node type, level, ...).
    Endpoint {
        parent: Option<&'a str>,
        child: Option<&'a str>,
    },
    /// Column describes the row itself (relationship kind, ...).
    Row(Option<&'a str>),
}

impl ColumnValues<'_> {
    pub fn is_endpoint(&self) -> bool {
        matches!(self, ColumnValues::Endpoint { .. })
    }

    /// Either-endpoint / row-value membership test.
    pub fn matches(&self, selected: &BTreeSet<String>) -> bool {
        let hit = |v: Option<&str>| v.map(|s| selected.contains(s)).unwrap_or(false);
        match *self {
            ColumnValues::Endpoint { parent, child } => hit(parent) || hit(child),
            ColumnValues::Row(v) => hit(v),
        }
    }
}

pub const COLUMN_ID: &str = "id";
pub const COLUMN_TYPE: &str = "type";
pub const COLUMN_KIND: &str = "kind";

impl Relation {
    pub fn new(parent: impl Into<String>, child: impl Into<String>) -> Self {
        Self {
            parent_id: parent.into(),
            child_id: child.into(),
            ..Default::default()
        }
    }

    pub fn with_types(mut self, parent_type: &str, child_type: &str) -> Self {
        self.parent_type = parent_type.to_string();
        self.child_type = child_type.to_string();
        self
    }

    pub fn with_kind(mut self, kind: &str) -> Self {
        self.relationship_kind = kind.to_string();
        self
    }

    pub fn with_extra(mut self, column: &str, value: &str) -> Self {
        self.extra.insert(column.to_string(), value.to_string());
        self
    }

    /// A row with a blank endpoint id carries no edge.
    pub fn is_edge(&self) -> bool {
        !self.parent_id.trim().is_empty() && !self.child_id.trim().is_empty()
    }

    pub fn column(&self, column: &str) -> ColumnValues<'_> {
        match column {
            COLUMN_ID => ColumnValues::Endpoint {
                parent: non_blank(&self.parent_id),
                child: non_blank(&self.child_id),
            },
            COLUMN_TYPE | "parentType" | "childType" => ColumnValues::Endpoint {
                parent: non_blank(&self.parent_type),
                child: non_blank(&self.child_type),
            },
            COLUMN_KIND | "relationshipKind" => ColumnValues::Row(non_blank(&self.relationship_kind)),
            other => {
                let parent = self.sided_extra(Side::Parent, other);
                let child = self.sided_extra(Side::Child, other);
                match (parent, child) {
                    (None, None) => ColumnValues::Row(
                        self.extra.get(other).and_then(|v| non_blank(v)),
                    ),
                    (p, c) => ColumnValues::Endpoint {
                        parent: p.and_then(non_blank),
                        child: c.and_then(non_blank),
                    },
                }
            }
        }
    }

    fn sided_extra(&self, side: Side, column: &str) -> Option<&str> {
        let (snake, camel) = sided_keys(side, column);
        self.extra
            .get(&snake)
            .or_else(|| self.extra.get(&camel))
            .map(String::as_str)
    }
}

fn non_blank(s: &str) -> Option<&str> {
    let t = s.trim();
    if t.is_empty() { None } else { Some(t) }
}

fn sided_keys(side: Side, column: &str) -> (String, String) {
    let prefix = match side {
        Side::Parent => "parent",
        Side::Child => "child",
    };
    let mut chars = column.chars();
    let camel = match chars.next() {
        Some(first) => format!("{prefix}{}{}", first.to_uppercase(), chars.as_str()),
        None => prefix.to_string(),
    };
    (format!("{prefix}_{column}"), camel)
}

/// Map an extra-column key to its logical filter column
/// (`parent_level` / `childLevel` -> `level`).
fn logical_column(key: &str) -> String {
    for prefix in ["parent_", "child_"] {
        if let Some(rest) = key.strip_prefix(prefix) {
            if !rest.is_empty() {
                return rest.to_string();
            }
        }
    }
    for prefix in ["parent", "child"] {
        if let Some(rest) = key.strip_prefix(prefix) {
            let mut chars = rest.chars();
            if let Some(first) = chars.next() {
                if first.is_uppercase() {
                    return format!("{}{}", first.to_lowercase(), chars.as_str());
                }
            }
        }
    }
    key.to_string()
}

/// Distinct non-blank values per filter column, for populating filter pickers.
/// Node ids are not offered as a column.
pub fn filter_options(relations: &[Relation]) -> BTreeMap<String, BTreeSet<String>> {
    let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut add = |column: &str, value: &str| {
        if let Some(v) = non_blank(value) {
            out.entry(column.to_string()).or_default().insert(v.to_string());
        }
    };
    for r in relations {
        add(COLUMN_TYPE, &r.parent_type);
        add(COLUMN_TYPE, &r.child_type);
        add(COLUMN_KIND, &r.relationship_kind);
        for (k, v) in &r.extra {
            add(&logical_column(k), v);
        }
    }
    out
}
