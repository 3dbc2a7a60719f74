//! Merges a node-definition snapshot into the [`NodeRegistry`].
//!
//! One pass:
//! 1. validate every entry, skipping incomplete ones and repeated ids;
//! 2. add new ids, refresh the config of existing ones (live state kept);
//! 3. evict ids that are no longer defined, closing their connections.
//!
//! The whole pass runs under the registry's write lock, so connection
//! handlers never see a half-merged registry.

use std::collections::HashSet;

use serde::Serialize;
use ss_domain::node::{NodeConfig, NodeEntry};

use super::registry::{NodeRegistry, NodeStatus};
use crate::error::ReconciliationError;

/// Outcome of one pass, for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub refreshed: usize,
    pub evicted: Vec<String>,
    /// Connections closed because their node was evicted or disabled.
    pub closed: usize,
    #[serde(skip)]
    pub skipped: Vec<ReconciliationError>,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.evicted.is_empty() || self.closed > 0
    }
}

/// Turn raw entries into usable configs, in order. Entries that are
/// incomplete or repeat an earlier id are returned as errors instead.
pub fn validate_entries(entries: &[NodeEntry]) -> (Vec<NodeConfig>, Vec<ReconciliationError>) {
    let mut seen = HashSet::new();
    let mut configs = Vec::with_capacity(entries.len());
    let mut errors = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        match entry.to_config() {
            Ok(cfg) if !seen.insert(cfg.id.clone()) => {
                errors.push(ReconciliationError::DuplicateId { index, id: cfg.id });
            }
            Ok(cfg) => configs.push(cfg),
            Err(field) => errors.push(ReconciliationError::MissingField { index, field }),
        }
    }
    (configs, errors)
}

/// Run one reconciliation pass of `entries` against `registry`.
pub fn reconcile(entries: &[NodeEntry], registry: &NodeRegistry) -> ReconcileReport {
    let (configs, skipped) = validate_entries(entries);
    for err in &skipped {
        tracing::warn!(error = %err, "skipping node definition");
    }

    let mut report = ReconcileReport {
        skipped,
        ..Default::default()
    };

    let mut inner = registry.inner.write();
    let mut seen: HashSet<String> = HashSet::with_capacity(configs.len());
    let mut order = Vec::with_capacity(configs.len());

    for cfg in configs {
        seen.insert(cfg.id.clone());
        order.push(cfg.id.clone());

        match inner.nodes.get_mut(&cfg.id) {
            Some(node) => {
                if node.config != cfg {
                    if node.config.enabled && !cfg.enabled {
                        let live = node.live.get_mut();
                        if let Some(binding) = live.reset() {
                            tracing::info!(
                                node_id = %cfg.id,
                                conn_id = %binding.conn_id,
                                "node disabled, closing its connection"
                            );
                            binding.closer.cancel();
                            report.closed += 1;
                        }
                    }
                    node.config = cfg;
                    report.refreshed += 1;
                }
            }
            None => {
                report.added.push(cfg.id.clone());
                inner.nodes.insert(cfg.id.clone(), NodeStatus::new(cfg));
            }
        }
    }

    let stale: Vec<String> = inner
        .nodes
        .keys()
        .filter(|id| !seen.contains(*id))
        .cloned()
        .collect();
    for id in stale {
        if let Some(mut node) = inner.nodes.remove(&id) {
            if let Some(binding) = node.live.get_mut().binding.take() {
                tracing::info!(
                    node_id = %id,
                    conn_id = %binding.conn_id,
                    "node removed from configuration, closing its connection"
                );
                // Fire-and-forget: the owning task finishes the close.
                binding.closer.cancel();
                report.closed += 1;
            }
        }
        report.evicted.push(id);
    }

    inner.order = order;
    report
}
