//! udsync: One-way file event replication over UDP
//!
//! Watches a directory tree and forwards file create/delete events to a
//! slave process, fire-and-forget:
//! - Custom datagram framing with a 16-bit checksum
//! - Heartbeat-based liveness detection
//! - Bounded retrying reads for freshly created files
//! - At-most-once, unordered delivery by design

use std::path::PathBuf;
use std::sync::Arc;

use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand, builder::Styles};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use tracing::{info, warn};

use udsync::session::SyncSession;
use udsync::stats::SyncStats;
use udsync_core::SyncConfig;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "udsync")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Replicate file create/delete events to a slave over UDP")]
#[command(long_about = r#"
udsync watches a directory tree on the master host and forwards file
creations (with content) and deletions to a slave process over UDP.

The slave announces itself with heartbeats; events are only sent while the
link is active. Delivery is at-most-once and unordered - there are no acks,
no retries, and no buffering while the slave is away.

Examples:
  udsync watch ./shared --port 4500     Track ./shared, listen on UDP 4500
  udsync watch                          Reuse settings from udsync.toml
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a directory and replicate its file events
    Watch {
        /// Directory to track (falls back to udsync.toml)
        path: Option<PathBuf>,

        /// UDP port to listen on for slave heartbeats
        #[arg(short, long)]
        port: Option<u16>,
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
            eprintln!("udsync {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Watch { path, port } => {
            watch_command(path, port).await?;
        }
    }

    Ok(())
}

async fn watch_command(path: Option<PathBuf>, port: Option<u16>) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let saved = SyncConfig::load(&cwd)?;

    let path = path
        .or(saved.tracking_path)
        .ok_or_else(|| eyre!("no tracking path: pass one or set tracking_path in udsync.toml"))?;
    let port = port
        .or(saved.listen_port)
        .ok_or_else(|| eyre!("no listen port: pass --port or set listen_port in udsync.toml"))?;

    let stats = Arc::new(SyncStats::default());
    let mut session = SyncSession::start(&path, port, Arc::clone(&stats)).await?;
    info!("tracking {} (listening on UDP {port})", path.display());

    // Persist the active settings for the next invocation.
    let active = SyncConfig {
        tracking_path: Some(path),
        listen_port: Some(port),
    };
    if let Err(e) = active.store(&cwd) {
        warn!("could not persist config: {e}");
    }

    let mut status_rx = session.watch_status();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = *status_rx.borrow_and_update();
            info!("connection status: {status:?}");
        }
    });

    tokio::signal::ctrl_c().await?;
    session.stop();
    info!("session stopped ({})", stats.snapshot());
    Ok(())
}
