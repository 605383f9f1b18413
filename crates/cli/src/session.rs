//! Sync session orchestration
//!
//! Wires watcher → event codec → transport. One task consumes the change
//! stream sequentially; each forwardable event is encoded and offered to
//! the transport, and the added/removed counters move only for events the
//! transport actually transmitted.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use color_eyre::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use udsync_core::protocol::{EventKind, FileChangeEvent};
use udsync_transport::{LinkStatus, UdpTransport};

use crate::stats::SyncStats;
use crate::watcher::{DirectoryWatcher, WatcherHandle};

/// A running master-side sync session
pub struct SyncSession {
    transport: Arc<UdpTransport>,
    stats: Arc<SyncStats>,
    handle: Option<WatcherHandle>,
    task: JoinHandle<()>,
}

impl SyncSession {
    /// Bind the transport, start watching `root`, and begin forwarding.
    ///
    /// # Errors
    /// Refuses to start when the listen port is taken or the root cannot
    /// be watched.
    pub async fn start(root: &Path, listen_port: u16, stats: Arc<SyncStats>) -> Result<Self> {
        stats.reset();
        let transport = Arc::new(UdpTransport::bind(listen_port).await?);
        let (handle, mut watcher) = DirectoryWatcher::start(root, Arc::clone(&stats))?;

        let task = tokio::spawn({
            let transport = Arc::clone(&transport);
            let stats = Arc::clone(&stats);
            async move {
                while let Some(event) = watcher.next_event().await {
                    forward(&event, &transport, &stats).await;
                }
                debug!("event pipeline drained");
            }
        });

        Ok(Self {
            transport,
            stats,
            handle: Some(handle),
            task,
        })
    }

    /// Address the transport bound (useful with port 0)
    ///
    /// # Errors
    /// Returns an error if the socket is gone.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Subscribe to connection status transitions
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.transport.watch_status()
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<SyncStats> {
        &self.stats
    }

    /// Tear the session down, best-effort.
    ///
    /// The watcher subscription is released and the transport stops
    /// listening immediately; a retrying read already in flight is left to
    /// finish on its own before the pipeline drains.
    pub fn stop(&mut self) {
        self.handle.take();
        self.transport.shutdown();
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.handle.take();
        self.transport.shutdown();
        self.task.abort();
    }
}

async fn forward(event: &FileChangeEvent, transport: &UdpTransport, stats: &SyncStats) {
    let payload = match event.encode() {
        Ok(payload) => payload,
        Err(e) => {
            warn!("could not encode {}: {e:#}", event.name);
            return;
        }
    };
    match transport.send(&payload).await {
        Ok(true) => {
            match event.kind {
                EventKind::Created => stats.increment_added(),
                EventKind::Deleted => stats.increment_removed(),
            }
            debug!("forwarded {:?} {}", event.kind, event.name);
        }
        Ok(false) => {
            debug!("link inactive, dropped {:?} {}", event.kind, event.name);
        }
        Err(e) => {
            // Error sink: report and move on, sends are never retried.
            warn!("send failed for {}: {e:#}", event.name);
        }
    }
}
