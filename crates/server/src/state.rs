use std::sync::Arc;

use ss_domain::config::Config;
use tokio_util::sync::CancellationToken;

use crate::coalescer::CoalescerHandle;
use crate::collector::Collector;
use crate::nodes::{NodeRegistry, NodeSource};
use crate::status::SnapshotStore;

/// Shared application state passed to the listeners and API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    // ── Nodes ─────────────────────────────────────────────────────────
    /// Latest node definitions read from `collector.nodes_file`.
    pub source: Arc<NodeSource>,
    pub registry: Arc<NodeRegistry>,

    // ── Collector ─────────────────────────────────────────────────────
    pub collector: Arc<Collector>,
    pub signals: CoalescerHandle,

    // ── Status ────────────────────────────────────────────────────────
    /// Last published snapshot, served over HTTP.
    pub snapshots: Arc<SnapshotStore>,

    /// Cancelled once on SIGINT/SIGTERM; every task watches a child of it.
    pub shutdown: CancellationToken,
}
