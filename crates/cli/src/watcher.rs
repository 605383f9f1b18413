//! Recursive directory watching and event building
//!
//! `notify` delivers raw create/remove notifications from its own callback
//! thread; they are forwarded over a channel and consumed by a single
//! sequential task. That task owns the known-directory set outright, so
//! classification never races a concurrent mutation.
//!
//! The known-directory set exists for one job: a deletion notification
//! arrives after the entry is gone from disk, so a removed directory can
//! only be recognized by having been seen before.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use color_eyre::Result;
use color_eyre::eyre::WrapErr as _;
use ignore::WalkBuilder;
use notify::{Event, EventKind as NotifyKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use udsync_core::protocol::{EventKind, FileChangeEvent};

use crate::stats::SyncStats;

/// Pause after a creation notification before touching the entry, giving
/// the writer a chance to finish flushing
const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// How many times to attempt reading a newly created file
pub(crate) const READ_ATTEMPTS: u32 = 5;

/// Delay between read attempts
pub(crate) const READ_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawKind {
    Created,
    Removed,
}

/// A notification as it comes off the OS watcher, before classification
#[derive(Debug)]
struct RawChange {
    path: PathBuf,
    kind: RawKind,
}

/// Keeps the OS subscription alive; dropping it stops watching and ends
/// the change stream.
pub struct WatcherHandle {
    _watcher: RecommendedWatcher,
}

/// Consumer side of the watch pipeline: turns raw notifications into
/// [`FileChangeEvent`]s, one at a time.
pub struct DirectoryWatcher {
    root: PathBuf,
    known_dirs: HashSet<PathBuf>,
    rx: mpsc::UnboundedReceiver<RawChange>,
    stats: Arc<SyncStats>,
}

impl DirectoryWatcher {
    /// Begin recursive monitoring of `root`.
    ///
    /// Seeds the known-directory set with a full recursive scan before
    /// subscribing, so deletions of pre-existing directories classify
    /// correctly.
    ///
    /// # Errors
    /// Returns an error if the root cannot be scanned or watched.
    pub fn start(root: &Path, stats: Arc<SyncStats>) -> Result<(WatcherHandle, Self)> {
        let root = root
            .canonicalize()
            .wrap_err_with(|| format!("cannot watch {}", root.display()))?;
        let known_dirs = scan_directories(&root)?;
        debug!(
            "watching {} ({} pre-existing directories)",
            root.display(),
            known_dirs.len()
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    let kind = match event.kind {
                        NotifyKind::Create(_) => RawKind::Created,
                        NotifyKind::Remove(_) => RawKind::Removed,
                        _ => return,
                    };
                    for path in event.paths {
                        let _ = tx.send(RawChange { path, kind });
                    }
                }
                Err(e) => warn!("watch error: {e}"),
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        Ok((
            WatcherHandle { _watcher: watcher },
            Self {
                root,
                known_dirs,
                rx,
                stats,
            },
        ))
    }

    /// Next forwardable event, or `None` once the watcher handle has been
    /// dropped and the remaining notifications are drained.
    pub async fn next_event(&mut self) -> Option<FileChangeEvent> {
        while let Some(change) = self.rx.recv().await {
            if let Some(event) = self.build(change).await {
                return Some(event);
            }
        }
        None
    }

    async fn build(&mut self, change: RawChange) -> Option<FileChangeEvent> {
        let name = relative_name(&self.root, &change.path)?;

        match change.kind {
            RawKind::Created => {
                tokio::time::sleep(SETTLE_DELAY).await;

                if change.path.is_dir() {
                    // Structural change: remember it, forward nothing.
                    self.known_dirs.insert(change.path);
                    None
                } else if change.path.is_file() {
                    match read_with_retry(&change.path).await {
                        Some(content) => Some(FileChangeEvent {
                            name,
                            kind: EventKind::Created,
                            is_directory: false,
                            content: Some(content),
                        }),
                        None => {
                            self.stats.increment_reads_abandoned();
                            debug!("giving up on {name} after {READ_ATTEMPTS} read attempts");
                            None
                        }
                    }
                } else {
                    // Entry vanished during the settle delay.
                    None
                }
            }
            RawKind::Removed => {
                // The path is usually gone from disk by now; fall back to
                // the known-directory set for classification.
                let is_directory = change.path.is_dir() || self.known_dirs.contains(&change.path);
                if is_directory {
                    // Only file payload changes cross the wire.
                    None
                } else {
                    Some(FileChangeEvent {
                        name,
                        kind: EventKind::Deleted,
                        is_directory: false,
                        content: None,
                    })
                }
            }
        }
    }
}

/// Collect every directory under `root` (excluding `root` itself).
///
/// Standard ignore filters are disabled: the classification set has to see
/// every directory, gitignored or not.
fn scan_directories(root: &Path) -> Result<HashSet<PathBuf>> {
    let mut dirs = HashSet::new();
    for result in WalkBuilder::new(root).standard_filters(false).build() {
        let entry = result?;
        if entry.path() == root {
            continue;
        }
        if entry.file_type().is_some_and(|t| t.is_dir()) {
            dirs.insert(entry.path().to_path_buf());
        }
    }
    Ok(dirs)
}

fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    if rel.as_os_str().is_empty() {
        return None;
    }
    Some(rel.to_string_lossy().replace('\\', "/"))
}

/// Read a file's full contents, tolerating a writer that still holds it.
///
/// Up to [`READ_ATTEMPTS`] attempts spaced [`READ_RETRY_DELAY`] apart.
/// `None` after exhaustion; the caller decides what the drop means.
pub(crate) async fn read_with_retry(path: &Path) -> Option<Bytes> {
    for attempt in 1..=READ_ATTEMPTS {
        match tokio::fs::read(path).await {
            Ok(content) => return Some(Bytes::from(content)),
            Err(e) => {
                trace!(
                    "read attempt {attempt}/{READ_ATTEMPTS} failed for {}: {e}",
                    path.display()
                );
                if attempt < READ_ATTEMPTS {
                    tokio::time::sleep(READ_RETRY_DELAY).await;
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Instant;
    use tempfile::TempDir;

    async fn expect_event(watcher: &mut DirectoryWatcher) -> FileChangeEvent {
        tokio::time::timeout(Duration::from_secs(3), watcher.next_event())
            .await
            .expect("no event arrived")
            .expect("change stream ended")
    }

    fn start(dir: &TempDir) -> (WatcherHandle, DirectoryWatcher, Arc<SyncStats>) {
        let stats = Arc::new(SyncStats::default());
        let (handle, watcher) = DirectoryWatcher::start(dir.path(), Arc::clone(&stats)).unwrap();
        (handle, watcher, stats)
    }

    #[tokio::test]
    async fn test_create_file_produces_event_with_content() {
        let dir = TempDir::new().unwrap();
        let (_handle, mut watcher, _) = start(&dir);

        fs::write(dir.path().join("a.txt"), [1, 2, 3]).unwrap();

        let event = expect_event(&mut watcher).await;
        assert_eq!(event.name, "a.txt");
        assert_eq!(event.kind, EventKind::Created);
        assert!(!event.is_directory);
        assert_eq!(event.content, Some(Bytes::from_static(&[1, 2, 3])));
    }

    #[tokio::test]
    async fn test_delete_file_produces_event_without_content() {
        let dir = TempDir::new().unwrap();
        let (_handle, mut watcher, _) = start(&dir);

        fs::write(dir.path().join("a.txt"), [1, 2, 3]).unwrap();
        let created = expect_event(&mut watcher).await;
        assert_eq!(created.kind, EventKind::Created);

        fs::remove_file(dir.path().join("a.txt")).unwrap();
        let deleted = expect_event(&mut watcher).await;
        assert_eq!(deleted.name, "a.txt");
        assert_eq!(deleted.kind, EventKind::Deleted);
        assert!(deleted.content.is_none());
    }

    #[tokio::test]
    async fn test_directory_lifecycle_produces_no_events() {
        let dir = TempDir::new().unwrap();
        let (_handle, mut watcher, _) = start(&dir);

        // Create and remove a directory, then drop a marker file. The first
        // event out of the stream must be the marker: the directory's
        // creation and deletion were both swallowed.
        fs::create_dir(dir.path().join("sub")).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        fs::remove_dir(dir.path().join("sub")).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        fs::write(dir.path().join("marker.txt"), "m").unwrap();

        let event = expect_event(&mut watcher).await;
        assert_eq!(event.name, "marker.txt");
        assert_eq!(event.kind, EventKind::Created);
    }

    #[tokio::test]
    async fn test_preexisting_directory_deletion_produces_no_event() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub/inner")).unwrap();

        // The seed scan, not a create notification, is what knows "inner".
        let (_handle, mut watcher, _) = start(&dir);

        fs::remove_dir(dir.path().join("sub/inner")).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        fs::write(dir.path().join("marker.txt"), "m").unwrap();

        let event = expect_event(&mut watcher).await;
        assert_eq!(event.name, "marker.txt");
    }

    #[tokio::test]
    async fn test_nested_file_name_uses_forward_slashes() {
        let dir = TempDir::new().unwrap();
        let (_handle, mut watcher, _) = start(&dir);

        fs::create_dir(dir.path().join("sub")).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        fs::write(dir.path().join("sub/b.txt"), "hi").unwrap();

        let event = expect_event(&mut watcher).await;
        assert_eq!(event.name, "sub/b.txt");
        assert_eq!(event.kind, EventKind::Created);
    }

    #[tokio::test]
    async fn test_read_with_retry_waits_for_late_writer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("slow.bin");

        let write_path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            fs::write(&write_path, [9, 9]).unwrap();
        });

        let content = read_with_retry(&path).await;
        assert_eq!(content, Some(Bytes::from_static(&[9, 9])));
    }

    #[tokio::test]
    async fn test_read_with_retry_exhausts_and_gives_up() {
        let dir = TempDir::new().unwrap();
        // Reading a directory fails on every attempt.
        let started = Instant::now();
        assert!(read_with_retry(dir.path()).await.is_none());
        // All five attempts ran, with four delays in between.
        assert!(started.elapsed() >= Duration::from_millis(400));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_unreadable_created_file_yields_no_event_and_counts_drop() {
        // /proc/self/mem is a regular file, so it passes the is_file
        // classification, but reading it at offset zero fails with EIO for
        // any privilege level. All five attempts fail, the notification is
        // dropped without an event, and only the counter moves.
        let stats = Arc::new(SyncStats::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = DirectoryWatcher {
            root: PathBuf::from("/proc/self"),
            known_dirs: HashSet::new(),
            rx,
            stats: Arc::clone(&stats),
        };

        tx.send(RawChange {
            path: PathBuf::from("/proc/self/mem"),
            kind: RawKind::Created,
        })
        .unwrap();
        drop(tx);

        // The stream drains without ever producing an event.
        let next = tokio::time::timeout(Duration::from_secs(3), watcher.next_event())
            .await
            .expect("pipeline did not drain");
        assert!(next.is_none());
        assert_eq!(stats.snapshot().reads_abandoned, 1);
    }

    #[tokio::test]
    async fn test_stream_ends_when_handle_dropped() {
        let dir = TempDir::new().unwrap();
        let (handle, mut watcher, _) = start(&dir);

        drop(handle);
        let next = tokio::time::timeout(Duration::from_secs(2), watcher.next_event())
            .await
            .expect("stream did not end");
        assert!(next.is_none());
    }
}
