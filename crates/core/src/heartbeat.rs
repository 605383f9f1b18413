//! Heartbeat messages announcing the slave's presence
//!
//! The slave periodically sends the UTF-8 text `SLAVE_ALIVE;<ipv4>;<port>`
//! (framed like every other datagram). The master learns the slave's reply
//! address from it and uses the arrival time for liveness tracking.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Message prefix identifying a heartbeat
pub const HEARTBEAT_PREFIX: &str = "SLAVE_ALIVE";

/// A parsed slave liveness announcement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// Address the slave wants events delivered to
    pub addr: SocketAddrV4,
}

impl Heartbeat {
    #[must_use]
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self {
            addr: SocketAddrV4::new(ip, port),
        }
    }

    /// Parse a heartbeat payload.
    ///
    /// Accepts exactly three `;`-separated fields with the `SLAVE_ALIVE`
    /// prefix and a parsable IPv4 address and port. Anything else yields
    /// `None`; a malformed heartbeat is discarded, never an error.
    #[must_use]
    pub fn parse(payload: &str) -> Option<Self> {
        if !payload.starts_with(HEARTBEAT_PREFIX) {
            return None;
        }

        let parts: Vec<&str> = payload.split(';').collect();
        if parts.len() != 3 {
            return None;
        }
        if parts[0] != HEARTBEAT_PREFIX {
            return None;
        }

        let ip: Ipv4Addr = parts[1].parse().ok()?;
        let port: u16 = parts[2].parse().ok()?;
        Some(Self::new(ip, port))
    }
}

impl fmt::Display for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{HEARTBEAT_PREFIX};{};{}",
            self.addr.ip(),
            self.addr.port()
        )
    }
}
