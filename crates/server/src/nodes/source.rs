//! Node definitions loaded from a JSON file, reloaded when it changes.
//!
//! The file holds either a bare array of node objects or an object with a
//! `nodes` array:
//!
//! ```json
//! [{ "id": "n1", "name": "Tokyo", "location": "JP", "region": "ap", "enabled": true }]
//! ```
//!
//! Readers always get a complete snapshot: a reload swaps the `Arc` in one
//! step, and a file that fails to parse leaves the previous snapshot in place.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use ss_domain::node::NodeEntry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::coalescer::{CoalescerHandle, Signal};

#[derive(Deserialize)]
#[serde(untagged)]
enum NodesFile {
    List(Vec<NodeEntry>),
    Wrapped { nodes: Vec<NodeEntry> },
}

impl NodesFile {
    fn into_entries(self) -> Vec<NodeEntry> {
        match self {
            Self::List(entries) | Self::Wrapped { nodes: entries } => entries,
        }
    }
}

/// Parse node definitions from JSON text.
pub fn parse_entries(raw: &str) -> ss_domain::Result<Vec<NodeEntry>> {
    let file: NodesFile = serde_json::from_str(raw)?;
    Ok(file.into_entries())
}

fn read_entries(path: &Path) -> ss_domain::Result<Vec<NodeEntry>> {
    let raw = std::fs::read_to_string(path)?;
    parse_entries(&raw)
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

pub struct NodeSource {
    path: Option<PathBuf>,
    current: RwLock<Arc<[NodeEntry]>>,
    modified: Mutex<Option<SystemTime>>,
}

impl NodeSource {
    /// Load definitions from `path`. A missing file yields an empty
    /// snapshot (picked up once the file appears); a malformed one is an error.
    pub fn load(path: impl Into<PathBuf>) -> ss_domain::Result<Self> {
        let path = path.into();
        let modified = modified_at(&path);
        let entries = if path.exists() {
            read_entries(&path).map_err(|e| {
                ss_domain::Error::Config(format!("reading {}: {e}", path.display()))
            })?
        } else {
            tracing::warn!(path = %path.display(), "nodes file not found, starting with no nodes");
            Vec::new()
        };
        tracing::info!(path = %path.display(), nodes = entries.len(), "node definitions loaded");

        Ok(Self {
            path: Some(path),
            current: RwLock::new(entries.into()),
            modified: Mutex::new(modified),
        })
    }

    /// A source that is never reloaded from disk.
    pub fn from_entries(entries: Vec<NodeEntry>) -> Self {
        Self {
            path: None,
            current: RwLock::new(entries.into()),
            modified: Mutex::new(None),
        }
    }

    /// The latest complete snapshot.
    pub fn current(&self) -> Arc<[NodeEntry]> {
        self.current.read().clone()
    }

    /// First entry carrying `id`, complete or not.
    pub fn lookup(&self, id: &str) -> Option<NodeEntry> {
        self.current().iter().find(|e| e.id() == Some(id)).cloned()
    }

    /// Swap in a new snapshot.
    pub fn replace(&self, entries: Vec<NodeEntry>) {
        *self.current.write() = entries.into();
    }

    /// Re-read the file unconditionally.
    pub fn reload(&self) -> ss_domain::Result<usize> {
        let Some(path) = &self.path else {
            return Ok(self.current().len());
        };
        let modified = modified_at(path);
        let entries = read_entries(path)?;
        let count = entries.len();
        self.replace(entries);
        *self.modified.lock() = modified;
        Ok(count)
    }

    /// Re-read the file if its modification time moved. Returns whether a
    /// new snapshot was swapped in.
    pub fn reload_if_changed(&self) -> ss_domain::Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let modified = modified_at(path);
        if modified.is_none() || modified == *self.modified.lock() {
            return Ok(false);
        }
        self.reload()?;
        Ok(true)
    }

    /// Poll the file every `interval` and raise [`Signal::Reload`] whenever
    /// a new snapshot is swapped in.
    pub fn spawn_watcher(
        self: Arc<Self>,
        interval: Duration,
        signals: CoalescerHandle,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.cancelled() => break,
                }
                match self.reload_if_changed() {
                    Ok(true) => {
                        tracing::info!(nodes = self.current().len(), "nodes file reloaded");
                        signals.signal(Signal::Reload);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "nodes file reload failed, keeping previous definitions");
                        // Don't retry the same broken file every tick.
                        *self.modified.lock() = self.path.as_deref().and_then(modified_at);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use tokio::sync::mpsc;

    use crate::coalescer::channel;

    /// Rewrite `path` and push its mtime `secs` into the future, so the
    /// change is visible even on filesystems with coarse timestamps.
    fn rewrite(path: &Path, contents: &str, secs: u64) {
        std::fs::write(path, contents).unwrap();
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(secs))
            .unwrap();
    }

    async fn next_signal(rx: &mut mpsc::Receiver<Signal>) -> Option<Signal> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[test]
    fn parses_bare_and_wrapped_files() {
        let bare = parse_entries(r#"[{"id":"a","name":"A","location":"x","region":"y","enable":true}]"#)
            .unwrap();
        assert_eq!(bare.len(), 1);
        assert_eq!(bare[0].enabled, Some(true));

        let wrapped = parse_entries(r#"{"nodes":[{"id":"a"},{"id":"b"}]}"#).unwrap();
        assert_eq!(wrapped.len(), 2);
        assert!(parse_entries("{not json").is_err());
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let source = NodeSource::load(dir.path().join("nodes.json")).unwrap();
        assert!(source.current().is_empty());
        assert!(!source.reload_if_changed().unwrap());
    }

    #[test]
    fn malformed_file_is_a_load_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[{{").unwrap();
        assert!(NodeSource::load(file.path()).is_err());
    }

    #[test]
    fn reload_swaps_snapshot_and_keeps_old_one_on_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"id":"n1"}}]"#).unwrap();
        let source = NodeSource::load(file.path()).unwrap();
        let before = source.current();
        assert_eq!(before.len(), 1);

        std::fs::write(file.path(), r#"[{"id":"n1"},{"id":"n2"}]"#).unwrap();
        assert_eq!(source.reload().unwrap(), 2);
        assert!(source.lookup("n2").is_some());
        // Earlier readers keep their own snapshot.
        assert_eq!(before.len(), 1);

        std::fs::write(file.path(), "garbage").unwrap();
        assert!(source.reload().is_err());
        assert_eq!(source.current().len(), 2);
    }

    #[test]
    fn unchanged_file_is_not_reloaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[]").unwrap();
        let source = NodeSource::load(file.path()).unwrap();
        assert!(!source.reload_if_changed().unwrap());
    }

    #[test]
    fn static_source_never_reloads() {
        let source = NodeSource::from_entries(vec![NodeEntry {
            id: Some("n1".into()),
            ..Default::default()
        }]);
        assert!(!source.reload_if_changed().unwrap());
        assert_eq!(source.reload().unwrap(), 1);
        assert!(source.lookup("n1").is_some());
        assert!(source.lookup("n2").is_none());
    }

    #[test]
    fn changed_mtime_triggers_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");
        std::fs::write(&path, r#"[{"id":"n1"}]"#).unwrap();
        let source = NodeSource::load(&path).unwrap();

        rewrite(&path, r#"[{"id":"n1"},{"id":"n2"}]"#, 10);
        assert!(source.reload_if_changed().unwrap());
        assert_eq!(source.current().len(), 2);
        assert!(!source.reload_if_changed().unwrap());
    }

    #[tokio::test]
    async fn watcher_signals_reload_when_the_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");
        std::fs::write(&path, r#"[{"id":"n1"}]"#).unwrap();
        let source = Arc::new(NodeSource::load(&path).unwrap());
        let (handle, mut rx) = channel(8);
        let shutdown = CancellationToken::new();
        let task = source
            .clone()
            .spawn_watcher(Duration::from_millis(20), handle, shutdown.clone());

        rewrite(&path, r#"[{"id":"n1"},{"id":"n2"}]"#, 10);
        assert_eq!(next_signal(&mut rx).await, Some(Signal::Reload));
        assert!(source.lookup("n2").is_some());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn watcher_picks_up_a_file_created_after_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");
        let source = Arc::new(NodeSource::load(&path).unwrap());
        assert!(source.current().is_empty());

        let (handle, mut rx) = channel(8);
        let shutdown = CancellationToken::new();
        source
            .clone()
            .spawn_watcher(Duration::from_millis(20), handle, shutdown.clone());

        rewrite(&path, r#"[{"id":"late"}]"#, 0);
        assert_eq!(next_signal(&mut rx).await, Some(Signal::Reload));
        assert!(source.lookup("late").is_some());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn watcher_keeps_previous_snapshot_on_a_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");
        std::fs::write(&path, r#"[{"id":"n1"}]"#).unwrap();
        let source = Arc::new(NodeSource::load(&path).unwrap());
        let (handle, mut rx) = channel(8);
        let shutdown = CancellationToken::new();
        source
            .clone()
            .spawn_watcher(Duration::from_millis(20), handle, shutdown.clone());

        rewrite(&path, "[{ not json", 10);
        // Several ticks pass: no reload is signalled, and the broken
        // modification is not retried.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(source.current().len(), 1);
        assert!(source.lookup("n1").is_some());
        assert!(!source.reload_if_changed().unwrap());

        // A fixed file is picked up again.
        rewrite(&path, r#"[{"id":"n1"},{"id":"n2"}]"#, 20);
        assert_eq!(next_signal(&mut rx).await, Some(Signal::Reload));
        assert_eq!(source.current().len(), 2);
        shutdown.cancel();
    }
}
