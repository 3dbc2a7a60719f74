//! Authoritative registry of configured nodes and their live status.
//!
//! Locking: a single registry-wide `RwLock` guards the key set. Connection
//! handlers take the read side and update one entry through its own mutex;
//! only the reconciler takes the write side, for a whole structural pass.
//! The id→connection binding lives inside the entry, so an id can never be
//! bound without also being present.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use ss_domain::node::NodeConfig;
use tokio_util::sync::CancellationToken;

use crate::error::AuthorizationError;
use crate::session::ConnId;
use crate::status::{NodeView, StatusSnapshot};

/// The live connection currently speaking for a node.
#[derive(Debug, Clone)]
pub struct Binding {
    pub conn_id: ConnId,
    /// Cancelling closes the bound connection.
    pub closer: CancellationToken,
}

#[derive(Debug, Default)]
pub(super) struct LiveState {
    pub(super) metrics: String,
    pub(super) online: bool,
    pub(super) binding: Option<Binding>,
}

impl LiveState {
    /// Drop the binding and everything it reported. Returns the binding so
    /// the caller can close it.
    pub(super) fn reset(&mut self) -> Option<Binding> {
        self.metrics.clear();
        self.online = false;
        self.binding.take()
    }
}

/// Live state for one configured node.
#[derive(Debug)]
pub struct NodeStatus {
    pub(super) config: NodeConfig,
    pub(super) live: Mutex<LiveState>,
}

impl NodeStatus {
    pub(super) fn new(config: NodeConfig) -> Self {
        Self {
            config,
            live: Mutex::new(LiveState::default()),
        }
    }

    fn view(&self) -> NodeView {
        let live = self.live.lock();
        NodeView {
            config: self.config.clone(),
            online: live.online,
            metrics: live.metrics.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub(super) struct Inner {
    pub(super) nodes: HashMap<String, NodeStatus>,
    /// Ids in configuration order.
    pub(super) order: Vec<String>,
}

/// Thread-safe registry of all configured nodes.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    pub(super) inner: RwLock<Inner>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `node_id` to a connection.
    ///
    /// Refuses rather than replaces when another connection already holds
    /// the id, so the live socket is never orphaned.
    pub fn bind(
        &self,
        node_id: &str,
        conn_id: ConnId,
        closer: CancellationToken,
    ) -> Result<(), AuthorizationError> {
        let inner = self.inner.read();
        let node = inner
            .nodes
            .get(node_id)
            .ok_or_else(|| AuthorizationError::NotFound(node_id.to_string()))?;
        if !node.config.enabled {
            return Err(AuthorizationError::Disabled(node_id.to_string()));
        }

        let mut live = node.live.lock();
        if let Some(existing) = &live.binding {
            tracing::warn!(
                node_id = %node_id,
                bound_conn = %existing.conn_id,
                rejected_conn = %conn_id,
                "node already bound to a live connection"
            );
            return Err(AuthorizationError::AlreadyBound(node_id.to_string()));
        }
        live.binding = Some(Binding { conn_id, closer });
        tracing::info!(node_id = %node_id, conn_id = %conn_id, "node bound");
        Ok(())
    }

    /// Undo a binding when its connection closes: metrics are cleared and
    /// the node goes offline. A no-op unless `conn_id` holds the binding.
    /// Returns whether anything changed.
    pub fn release(&self, node_id: &str, conn_id: ConnId) -> bool {
        let inner = self.inner.read();
        let Some(node) = inner.nodes.get(node_id) else {
            return false;
        };
        let mut live = node.live.lock();
        if !is_bound_to(&live, conn_id) {
            return false;
        }
        live.reset();
        tracing::info!(node_id = %node_id, conn_id = %conn_id, "node released");
        true
    }

    /// Store a metrics report and mark the node online. Returns `false` if
    /// the node is gone or no longer bound to `conn_id`.
    pub fn record_metrics(&self, node_id: &str, conn_id: ConnId, payload: String) -> bool {
        let inner = self.inner.read();
        let Some(node) = inner.nodes.get(node_id) else {
            return false;
        };
        let mut live = node.live.lock();
        if !is_bound_to(&live, conn_id) {
            return false;
        }
        live.metrics = payload;
        live.online = true;
        true
    }

    /// Mark the node online after a heartbeat. Returns `Some(true)` when
    /// this flipped it from offline, `Some(false)` when it already was
    /// online, and `None` if the node is gone or bound elsewhere.
    pub fn touch(&self, node_id: &str, conn_id: ConnId) -> Option<bool> {
        let inner = self.inner.read();
        let node = inner.nodes.get(node_id)?;
        let mut live = node.live.lock();
        if !is_bound_to(&live, conn_id) {
            return None;
        }
        let flipped = !live.online;
        live.online = true;
        Some(flipped)
    }

    /// The connection currently bound to `node_id`, if any.
    pub fn bound_conn(&self, node_id: &str) -> Option<ConnId> {
        let inner = self.inner.read();
        let node = inner.nodes.get(node_id)?;
        let live = node.live.lock();
        live.binding.as_ref().map(|b| b.conn_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.inner.read().nodes.contains_key(node_id)
    }

    pub fn config(&self, node_id: &str) -> Option<NodeConfig> {
        self.inner.read().nodes.get(node_id).map(|n| n.config.clone())
    }

    /// Consistent copy of every entry, in configuration order.
    pub fn snapshot(&self, cause: &'static str) -> StatusSnapshot {
        let inner = self.inner.read();
        let nodes = inner
            .order
            .iter()
            .filter_map(|id| inner.nodes.get(id))
            .map(NodeStatus::view)
            .collect();
        StatusSnapshot {
            cause,
            updated_at: Utc::now(),
            nodes,
        }
    }

    /// Number of configured nodes.
    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().nodes.is_empty()
    }
}

fn is_bound_to(live: &LiveState, conn_id: ConnId) -> bool {
    live.binding.as_ref().is_some_and(|b| b.conn_id == conn_id)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::nodes::reconcile::reconcile;
    use ss_domain::node::NodeEntry;

    pub(crate) fn entry(id: &str, enabled: bool) -> NodeEntry {
        NodeConfig {
            id: id.into(),
            name: format!("{id}-name"),
            location: "Frankfurt".into(),
            region: "eu".into(),
            enabled,
        }
        .into()
    }

    fn registry_with(entries: &[NodeEntry]) -> NodeRegistry {
        let reg = NodeRegistry::new();
        reconcile(entries, &reg);
        reg
    }

    #[test]
    fn bind_rejects_unknown_and_disabled() {
        let reg = registry_with(&[entry("on", true), entry("off", false)]);
        assert_eq!(
            reg.bind("missing", ConnId(1), CancellationToken::new()),
            Err(AuthorizationError::NotFound("missing".into()))
        );
        assert_eq!(
            reg.bind("off", ConnId(1), CancellationToken::new()),
            Err(AuthorizationError::Disabled("off".into()))
        );
        assert!(reg.bind("on", ConnId(1), CancellationToken::new()).is_ok());
        assert_eq!(reg.bound_conn("on"), Some(ConnId(1)));
    }

    #[test]
    fn second_bind_is_refused_not_replaced() {
        let reg = registry_with(&[entry("n1", true)]);
        let first = CancellationToken::new();
        reg.bind("n1", ConnId(1), first.clone()).unwrap();

        assert_eq!(
            reg.bind("n1", ConnId(2), CancellationToken::new()),
            Err(AuthorizationError::AlreadyBound("n1".into()))
        );
        assert_eq!(reg.bound_conn("n1"), Some(ConnId(1)));
        assert!(!first.is_cancelled());
    }

    #[test]
    fn metrics_and_touch_require_the_bound_connection() {
        let reg = registry_with(&[entry("n1", true)]);
        assert!(!reg.record_metrics("n1", ConnId(1), "cpu=1".into()));
        assert_eq!(reg.touch("n1", ConnId(1)), None);

        reg.bind("n1", ConnId(1), CancellationToken::new()).unwrap();
        assert_eq!(reg.touch("n1", ConnId(1)), Some(true));
        assert_eq!(reg.touch("n1", ConnId(1)), Some(false));
        assert!(reg.record_metrics("n1", ConnId(1), "cpu=10".into()));
        assert!(!reg.record_metrics("n1", ConnId(2), "cpu=99".into()));

        let snap = reg.snapshot("test");
        let node = snap.node("n1").unwrap();
        assert!(node.online);
        assert_eq!(node.metrics, "cpu=10");
    }

    #[test]
    fn release_resets_status_and_frees_the_id() {
        let reg = registry_with(&[entry("n1", true)]);
        reg.bind("n1", ConnId(1), CancellationToken::new()).unwrap();
        reg.record_metrics("n1", ConnId(1), "cpu=10".into());

        assert!(!reg.release("n1", ConnId(2)));
        assert!(reg.release("n1", ConnId(1)));
        assert!(!reg.release("n1", ConnId(1)));

        let snap = reg.snapshot("test");
        let node = snap.node("n1").unwrap();
        assert!(!node.online);
        assert_eq!(node.metrics, "");
        assert!(reg.bind("n1", ConnId(3), CancellationToken::new()).is_ok());
    }

    #[test]
    fn snapshot_follows_configuration_order() {
        let reg = registry_with(&[entry("b", true), entry("a", true), entry("c", false)]);
        let ids: Vec<_> = reg
            .snapshot("test")
            .nodes
            .iter()
            .map(|n| n.config.id.clone())
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert_eq!(reg.len(), 3);
    }
}
