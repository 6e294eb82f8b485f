pub mod history;
pub mod signature;
pub mod snapshot;

pub use history::{HistoryLog, HistoryMove, HistoryStore, PushOutcome};
pub use snapshot::{
    GraphStateSnapshot, LayoutDirection, Position, Positions, SnapshotInput, make_snapshot,
};
