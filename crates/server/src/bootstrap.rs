//! AppState construction and background-task spawning.
//!
//! `serve` and the integration tests share this boot path so the collector
//! runs with exactly the same wiring with or without the binary around it.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use ss_domain::config::{Config, ConfigSeverity};

use crate::coalescer::{self, Coalescer, Signal};
use crate::collector::Collector;
use crate::nodes::{reconcile, NodeRegistry, NodeSource};
use crate::state::AppState;
use crate::status::SnapshotStore;

/// Validate config, load the node definitions, wire the collector core and
/// start the coalescer. The first snapshot is requested before returning.
pub async fn build_app_state(
    config: Arc<Config>,
    shutdown: CancellationToken,
) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Node definitions ─────────────────────────────────────────────
    let source = Arc::new(
        NodeSource::load(&config.collector.nodes_file).context("loading node definitions")?,
    );

    // ── Registry + status sink ───────────────────────────────────────
    // The first pass runs inline: once this returns, every configured id
    // can authorize.
    let registry = Arc::new(NodeRegistry::new());
    let report = reconcile(&source.current(), &registry);
    tracing::info!(
        nodes = registry.len(),
        skipped = report.skipped.len(),
        "registry populated"
    );
    let snapshots = Arc::new(SnapshotStore::new());

    // ── Coalescer ────────────────────────────────────────────────────
    let (signals, rx) = coalescer::channel(config.collector.signal_queue);
    Coalescer::new(rx, source.clone(), registry.clone(), snapshots.clone())
        .spawn(shutdown.child_token());
    tracing::info!(capacity = config.collector.signal_queue, "coalescer ready");

    // ── Collector core ───────────────────────────────────────────────
    let collector = Arc::new(Collector::new(
        source.clone(),
        registry.clone(),
        signals.clone(),
    ));

    // Publish the initial snapshot.
    signals.signal(Signal::Init);

    Ok(AppState {
        config,
        source,
        registry,
        collector,
        signals,
        snapshots,
        shutdown,
    })
}

/// Spawn long-running loops that are not tied to a listener.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Nodes file watcher ───────────────────────────────────────────
    state.source.clone().spawn_watcher(
        state.config.collector.reload_interval(),
        state.signals.clone(),
        state.shutdown.child_token(),
    );
    tracing::info!(
        path = %state.config.collector.nodes_file.display(),
        interval_secs = state.config.collector.reload_interval_secs,
        "nodes file watcher started"
    );
}
