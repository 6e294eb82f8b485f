// src/services/mod.rs

pub mod gateway;      // durable key/value seam (memory, file, sqlite)
pub mod layout;       // external layout engine seam + fallback
pub mod positions;    // node record map written through the gateway

// Public API
pub use gateway::{
    FileGateway, GatewayError, MemoryGateway, PersistenceGateway, SqliteGateway, open_gateway,
};
pub use layout::{Layout, merge_layout};
pub use positions::{NodeRecord, NodeRecordMap, PositionCache, ViewRecord};
