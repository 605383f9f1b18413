//! UDP socket ownership and the receive/ticker tasks
//!
//! The transport binds a loopback endpoint, listens for framed heartbeats
//! from the slave, and sends framed event payloads back to the address the
//! slave last announced. Sends are fire-and-forget: there is no delivery
//! confirmation, no retry, and no queuing. A payload offered while the link
//! is inactive is dropped.
//!
//! Liveness state lives behind a single mutex touched only by the receive
//! loop, the periodic checker, and the status read in [`UdpTransport::send`].
//! Status transitions are broadcast over a `watch` channel, so observers
//! hear about edges only, not every heartbeat.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use color_eyre::Result;
use color_eyre::eyre::WrapErr as _;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use udsync_core::frame::{decode_frame, encode_frame};
use udsync_core::heartbeat::Heartbeat;

use crate::liveness::{CHECK_INTERVAL, LinkStatus, Liveness};

/// Largest datagram the receive loop will accept
const MAX_DATAGRAM: usize = 64 * 1024;

/// UDP transport for the master side of a sync session
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    link: Arc<Mutex<Liveness>>,
    status_tx: Arc<watch::Sender<LinkStatus>>,
    recv_task: JoinHandle<()>,
    check_task: JoinHandle<()>,
}

impl UdpTransport {
    /// Bind `127.0.0.1:listen_port` and start the receive loop and the
    /// periodic liveness checker.
    ///
    /// # Errors
    /// Returns an error when the port is already taken. That is a
    /// precondition failure: the session is refused, not retried.
    pub async fn bind(listen_port: u16) -> Result<Self> {
        let bind_addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, listen_port);
        let socket = Arc::new(
            UdpSocket::bind(bind_addr)
                .await
                .wrap_err_with(|| format!("failed to bind UDP socket on {bind_addr}"))?,
        );

        let link = Arc::new(Mutex::new(Liveness::new()));
        let (status_tx, _) = watch::channel(LinkStatus::Inactive);
        let status_tx = Arc::new(status_tx);

        let recv_task = tokio::spawn(receive_loop(
            Arc::clone(&socket),
            Arc::clone(&link),
            Arc::clone(&status_tx),
        ));
        let check_task = tokio::spawn(check_loop(Arc::clone(&link), Arc::clone(&status_tx)));

        Ok(Self {
            socket,
            link,
            status_tx,
            recv_task,
            check_task,
        })
    }

    /// Address the socket actually bound (useful with port 0)
    ///
    /// # Errors
    /// Returns an error if the socket is gone.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Current link status
    #[must_use]
    pub fn status(&self) -> LinkStatus {
        *self.status_tx.borrow()
    }

    /// Subscribe to link status transitions
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.status_tx.subscribe()
    }

    /// Frame `payload` and transmit it to the slave.
    ///
    /// Returns `Ok(true)` if the datagram was handed to the socket,
    /// `Ok(false)` if the link is inactive and the payload was dropped.
    /// A send confirms transmission only, never delivery.
    ///
    /// # Errors
    /// Returns socket-level send failures; the caller reports them and
    /// moves on, there is no retry.
    pub async fn send(&self, payload: &[u8]) -> Result<bool> {
        let target = {
            let link = self.link.lock().expect("liveness lock poisoned");
            if link.status() != LinkStatus::Active {
                return Ok(false);
            }
            link.remote()
        };
        // Active implies a remote address has been seen
        let Some(target) = target else {
            return Ok(false);
        };

        let frame = encode_frame(payload);
        self.socket
            .send_to(&frame, SocketAddr::V4(target))
            .await
            .wrap_err_with(|| format!("failed to send datagram to {target}"))?;
        trace!("sent {} byte frame to {target}", frame.len());
        Ok(true)
    }

    /// Stop listening: halt both background tasks and force the link down,
    /// notifying observers if that is a transition.
    pub fn shutdown(&self) {
        self.recv_task.abort();
        self.check_task.abort();

        let transition = {
            let mut link = self.link.lock().expect("liveness lock poisoned");
            link.force_inactive()
        };
        if let Some(status) = transition {
            let _ = self.status_tx.send(status);
        }
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.recv_task.abort();
        self.check_task.abort();
    }
}

/// Receive datagrams until the task is aborted.
///
/// Anything that is not a well-formed frame carrying a well-formed
/// heartbeat is silently discarded; transient socket errors are swallowed
/// and the loop keeps going.
async fn receive_loop(
    socket: Arc<UdpSocket>,
    link: Arc<Mutex<Liveness>>,
    status_tx: Arc<watch::Sender<LinkStatus>>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, peer)) => {
                handle_datagram(&buf[..len], peer, &link, &status_tx);
            }
            Err(e) => {
                debug!("recv error (ignored): {e}");
            }
        }
    }
}

fn handle_datagram(
    data: &[u8],
    peer: SocketAddr,
    link: &Mutex<Liveness>,
    status_tx: &watch::Sender<LinkStatus>,
) {
    let Some(payload) = decode_frame(data) else {
        trace!("discarding invalid frame from {peer} ({} bytes)", data.len());
        return;
    };
    let Ok(text) = std::str::from_utf8(&payload) else {
        return;
    };
    let Some(heartbeat) = Heartbeat::parse(text) else {
        trace!("discarding non-heartbeat payload from {peer}");
        return;
    };

    let transition = {
        let mut link = link.lock().expect("liveness lock poisoned");
        link.on_heartbeat(Instant::now(), heartbeat.addr)
    };
    if let Some(status) = transition {
        info!("slave active at {}", heartbeat.addr);
        let _ = status_tx.send(status);
    }
}

/// Expire a stale link every [`CHECK_INTERVAL`].
async fn check_loop(link: Arc<Mutex<Liveness>>, status_tx: Arc<watch::Sender<LinkStatus>>) {
    // First check runs one full interval after startup, not immediately.
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + CHECK_INTERVAL,
        CHECK_INTERVAL,
    );
    loop {
        ticker.tick().await;
        let transition = {
            let mut link = link.lock().expect("liveness lock poisoned");
            link.check(Instant::now())
        };
        if let Some(status) = transition {
            info!("slave inactive: heartbeat timeout");
            let _ = status_tx.send(status);
        }
    }
}
