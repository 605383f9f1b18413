//! udsync-agent: Slave-side receiver
//!
//! Announces itself to the master with a framed heartbeat every second and
//! applies the framed file events it receives under a root directory.
//! Malformed datagrams are discarded and the loop keeps going; losing a few
//! events is part of the transport's contract.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::bail;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use udsync_core::frame::{decode_frame, encode_frame};
use udsync_core::heartbeat::Heartbeat;
use udsync_core::protocol::{EventKind, FileChangeEvent};

/// How often the agent announces itself
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);

const MAX_DATAGRAM: usize = 64 * 1024;

#[derive(Parser)]
#[command(name = "udsync-agent")]
#[command(version)]
#[command(about = "Slave-side receiver for udsync file event replication")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Announce to a master and apply received events under a root
    Run {
        /// Master address to announce to
        #[arg(short, long, default_value = "127.0.0.1:4500")]
        master: SocketAddr,

        /// Directory events are applied under
        #[arg(short, long)]
        root: PathBuf,

        /// Local UDP port to receive events on (0 picks a free one)
        #[arg(short, long, default_value = "0")]
        port: u16,
    },

    /// Show version info
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Version => {
            eprintln!("udsync-agent {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Run { master, root, port } => {
            run(master, &root, port).await?;
        }
    }

    Ok(())
}

async fn run(master: SocketAddr, root: &Path, port: u16) -> Result<()> {
    std::fs::create_dir_all(root)?;

    let socket = Arc::new(UdpSocket::bind((Ipv4Addr::LOCALHOST, port)).await?);
    let local_port = socket.local_addr()?.port();
    info!("announcing to {master}, receiving on 127.0.0.1:{local_port}");

    let hb_socket = Arc::clone(&socket);
    tokio::spawn(async move {
        let hb = Heartbeat::new(Ipv4Addr::LOCALHOST, local_port);
        let frame = encode_frame(hb.to_string().as_bytes());
        let mut ticker = tokio::time::interval(HEARTBEAT_PERIOD);
        loop {
            ticker.tick().await;
            if let Err(e) = hb_socket.send_to(&frame, master).await {
                warn!("heartbeat send failed: {e}");
            }
        }
    });

    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                debug!("recv error (ignored): {e}");
                continue;
            }
        };
        let Some(payload) = decode_frame(&buf[..len]) else {
            debug!("discarding invalid frame from {peer}");
            continue;
        };
        let event = match FileChangeEvent::decode(&payload) {
            Ok(event) => event,
            Err(e) => {
                debug!("discarding malformed event from {peer}: {e}");
                continue;
            }
        };
        if let Err(e) = apply_event(root, &event) {
            warn!("failed to apply {:?} {}: {e}", event.kind, event.name);
        }
    }
}

/// Materialize one event under `root`.
fn apply_event(root: &Path, event: &FileChangeEvent) -> Result<()> {
    if event.name.split('/').any(|part| part == "..") {
        bail!("refusing path that escapes the root: {}", event.name);
    }
    let full_path = root.join(&event.name);

    match event.kind {
        EventKind::Created => {
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let content = event.content.as_deref().unwrap_or(&[]);
            std::fs::write(&full_path, content)?;
            info!("wrote {} ({} bytes)", event.name, content.len());
        }
        EventKind::Deleted => {
            if full_path.exists() {
                std::fs::remove_file(&full_path)?;
            }
            info!("removed {}", event.name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn created(name: &str, content: &'static [u8]) -> FileChangeEvent {
        FileChangeEvent {
            name: name.to_string(),
            kind: EventKind::Created,
            is_directory: false,
            content: Some(Bytes::from_static(content)),
        }
    }

    fn deleted(name: &str) -> FileChangeEvent {
        FileChangeEvent {
            name: name.to_string(),
            kind: EventKind::Deleted,
            is_directory: false,
            content: None,
        }
    }

    #[test]
    fn test_apply_created_writes_nested_file() {
        let dir = TempDir::new().unwrap();
        apply_event(dir.path(), &created("sub/dir/a.txt", &[1, 2, 3])).unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("sub/dir/a.txt")).unwrap(),
            [1, 2, 3]
        );
    }

    #[test]
    fn test_apply_created_without_content_writes_empty_file() {
        let dir = TempDir::new().unwrap();
        let mut event = created("a.txt", &[]);
        event.content = None;
        apply_event(dir.path(), &event).unwrap();
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), [0u8; 0]);
    }

    #[test]
    fn test_apply_deleted_removes_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        apply_event(dir.path(), &deleted("a.txt")).unwrap();
        assert!(!dir.path().join("a.txt").exists());
    }

    #[test]
    fn test_apply_deleted_on_missing_file_is_ok() {
        let dir = TempDir::new().unwrap();
        apply_event(dir.path(), &deleted("never-existed.txt")).unwrap();
    }

    #[test]
    fn test_apply_rejects_path_escaping_root() {
        let dir = TempDir::new().unwrap();
        assert!(apply_event(dir.path(), &created("../escape.txt", b"x")).is_err());
        assert!(apply_event(dir.path(), &deleted("a/../../escape.txt")).is_err());
    }
}
