pub mod filter;
pub mod lineage;
pub mod neighborhood;
pub mod relation;

pub use filter::{BoundedFilter, ColumnFilters, FilterOutcome, Truncation};
pub use lineage::LineageGraph;
pub use neighborhood::{NeighborhoodResolver, NeighborhoodSelection};
pub use relation::{ColumnValues, NodeId, Relation, filter_options};
