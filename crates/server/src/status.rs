//! Published registry snapshots and the sink they are handed to.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use ss_domain::node::NodeConfig;
use tokio::sync::watch;

/// One node as seen by downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeView {
    #[serde(flatten)]
    pub config: NodeConfig,
    pub online: bool,
    /// Last reported metrics blob; empty when the node has none.
    pub metrics: String,
}

/// Immutable picture of the registry taken at the end of a reconcile pass.
///
/// Each snapshot is a full replacement of the previous one, never a delta.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// What triggered the pass that produced this snapshot.
    pub cause: &'static str,
    pub updated_at: DateTime<Utc>,
    /// Nodes in configuration order.
    pub nodes: Vec<NodeView>,
}

impl StatusSnapshot {
    pub fn empty() -> Self {
        Self {
            cause: "empty",
            updated_at: Utc::now(),
            nodes: Vec::new(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&NodeView> {
        self.nodes.iter().find(|n| n.config.id == id)
    }

    pub fn online_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.online).count()
    }
}

/// Consumer of published snapshots.
pub trait StatusSink: Send + Sync {
    fn publish(&self, snapshot: Arc<StatusSnapshot>);
}

/// Default sink: keeps the latest snapshot for the HTTP layer and lets
/// tasks wait for the next one.
pub struct SnapshotStore {
    tx: watch::Sender<Arc<StatusSnapshot>>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(StatusSnapshot::empty()));
        Self { tx }
    }

    pub fn latest(&self) -> Arc<StatusSnapshot> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<StatusSnapshot>> {
        self.tx.subscribe()
    }
}

impl StatusSink for SnapshotStore {
    fn publish(&self, snapshot: Arc<StatusSnapshot>) {
        self.tx.send_replace(snapshot);
    }
}
