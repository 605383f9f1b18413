//! udsync: master-side session orchestration
//!
//! The binary in `main.rs` is a thin CLI over these modules.

pub mod session;
pub mod stats;
pub mod watcher;

pub use session::SyncSession;
pub use stats::{StatsSnapshot, SyncStats};
