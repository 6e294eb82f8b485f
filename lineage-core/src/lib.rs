//! Lineage-Core: graph state history and lineage filtering for table
//! relationship graphs.
//!
//! - `graph`: relation rows, the lineage graph, neighborhood closure and the
//!   budgeted filter.
//! - `memory`: view snapshots, their signatures and the per-file undo/redo log.
//! - `services`: persistence gateways, the node record cache and the layout seam.
//! - `commands`: state-root initialization and the per-file `Session`.

pub mod commands;
pub mod config;
pub mod graph;
pub mod memory;
pub mod services;
pub mod utils;

pub use commands::Session;
pub use config::CoreConfig;
