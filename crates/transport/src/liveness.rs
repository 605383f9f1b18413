//! Heartbeat-driven liveness state machine
//!
//! Pure state, no clock of its own: callers pass `Instant`s in, which keeps
//! the timing behavior unit-testable. The transport drives it from two
//! places, the receive loop (heartbeat arrivals) and a periodic checker.
//!
//! The canonical heartbeat timeout is 5 seconds, matched to the 5 second
//! check interval. Deployments of the predecessor system disagreed on this
//! constant (3 s vs 5 s); 5 s is fixed here so a link with a healthy
//! heartbeat cadence never flaps between checks.

use std::net::SocketAddrV4;
use std::time::{Duration, Instant};

/// Gap since the last heartbeat after which the link is considered dead
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the timeout check runs
pub const CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Whether the slave is currently reachable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Inactive,
    Active,
}

/// Connection state for the single slave link.
///
/// Starts `Inactive`. Goes `Active` on a validated heartbeat and falls back
/// to `Inactive` when the periodic check sees the heartbeat gap exceed the
/// timeout. The transition methods return `Some(new_status)` only on an
/// actual state change, so observers are never re-notified for a heartbeat
/// that merely refreshes an already-active link.
#[derive(Debug)]
pub struct Liveness {
    status: LinkStatus,
    last_heartbeat: Option<Instant>,
    remote: Option<SocketAddrV4>,
    timeout: Duration,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeout(HEARTBEAT_TIMEOUT)
    }

    /// Build with a non-default timeout (tests shrink it)
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            status: LinkStatus::Inactive,
            last_heartbeat: None,
            remote: None,
            timeout,
        }
    }

    #[must_use]
    pub fn status(&self) -> LinkStatus {
        self.status
    }

    /// Address the slave last announced, if any
    #[must_use]
    pub fn remote(&self) -> Option<SocketAddrV4> {
        self.remote
    }

    /// Record a validated heartbeat from `addr` at `now`.
    ///
    /// Returns `Some(LinkStatus::Active)` on the Inactive→Active edge,
    /// `None` when the link was already active.
    pub fn on_heartbeat(&mut self, now: Instant, addr: SocketAddrV4) -> Option<LinkStatus> {
        self.last_heartbeat = Some(now);
        self.remote = Some(addr);

        if self.status == LinkStatus::Inactive {
            self.status = LinkStatus::Active;
            Some(self.status)
        } else {
            None
        }
    }

    /// Periodic timeout check.
    ///
    /// Returns `Some(LinkStatus::Inactive)` when an active link's heartbeat
    /// gap has exceeded the timeout, `None` otherwise.
    pub fn check(&mut self, now: Instant) -> Option<LinkStatus> {
        if self.status != LinkStatus::Active {
            return None;
        }

        let expired = match self.last_heartbeat {
            Some(at) => now.duration_since(at) > self.timeout,
            None => true,
        };
        if expired {
            self.status = LinkStatus::Inactive;
            Some(self.status)
        } else {
            None
        }
    }

    /// Force the link down, used on shutdown.
    ///
    /// Returns `Some(LinkStatus::Inactive)` if that was a transition.
    pub fn force_inactive(&mut self) -> Option<LinkStatus> {
        if self.status == LinkStatus::Active {
            self.status = LinkStatus::Inactive;
            Some(self.status)
        } else {
            None
        }
    }
}
