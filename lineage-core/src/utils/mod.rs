pub mod clock;
pub mod coalesce;
pub mod path;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coalesce::WriteCoalescer;
