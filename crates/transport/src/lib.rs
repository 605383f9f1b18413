//! udsync-transport: UDP transport layer
//!
//! Owns the datagram socket, tracks slave liveness from heartbeats, and
//! gates outbound sends on the link being active.

pub mod liveness;
pub mod udp;

pub use liveness::{CHECK_INTERVAL, HEARTBEAT_TIMEOUT, LinkStatus, Liveness};
pub use udp::UdpTransport;
