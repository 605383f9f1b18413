//! Session statistics
//!
//! Counters for events actually forwarded, plus a visibility counter for
//! creations dropped after the retrying read gave up. The drop is silent by
//! design; the counter exists so it can be observed and tested.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counters for one sync session
#[derive(Debug, Default)]
pub struct SyncStats {
    files_added: AtomicU64,
    files_removed: AtomicU64,
    reads_abandoned: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub files_added: u64,
    pub files_removed: u64,
    pub reads_abandoned: u64,
}

impl SyncStats {
    pub fn increment_added(&self) {
        self.files_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_removed(&self) {
        self.files_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_reads_abandoned(&self) {
        self.reads_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// Zero everything, called when a session starts
    pub fn reset(&self) {
        self.files_added.store(0, Ordering::Relaxed);
        self.files_removed.store(0, Ordering::Relaxed);
        self.reads_abandoned.store(0, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            files_added: self.files_added.load(Ordering::Relaxed),
            files_removed: self.files_removed.load(Ordering::Relaxed),
            reads_abandoned: self.reads_abandoned.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "added: {}, removed: {}, reads abandoned: {}",
            self.files_added, self.files_removed, self.reads_abandoned
        )
    }
}
