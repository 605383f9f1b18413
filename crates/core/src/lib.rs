//! udsync-core: Wire protocol and shared types
//!
//! Provides datagram framing, the file-event codec, heartbeat parsing,
//! and configuration file handling.

pub mod config;
pub mod frame;
pub mod heartbeat;
pub mod protocol;

pub use config::SyncConfig;
pub use frame::{decode_frame, encode_frame};
pub use heartbeat::Heartbeat;
pub use protocol::{EventKind, FileChangeEvent};
