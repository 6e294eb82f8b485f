// src/commands/mod.rs
pub mod init;
mod session;

pub use init::{InitReport, ensure_initialized, lineage_root};
pub use session::Session;
