//! Serialized reconcile-and-publish worker.
//!
//! Producers (startup, nodes-file reloads, connection handlers) push a
//! [`Signal`] without ever blocking; a full queue drops the signal. One
//! consumer drains whatever has queued up, runs a single reconcile pass
//! against the latest node definitions and publishes a fresh snapshot.
//! Dropping is safe: a full queue means a pass is already pending, and
//! every pass recomputes state from scratch.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::nodes::{reconcile, NodeRegistry, NodeSource};
use crate::status::StatusSink;

/// Why a reconcile pass was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Process start.
    Init,
    /// The node definitions changed.
    Reload,
    /// A node reported metrics.
    Metrics(String),
    /// A node went online or offline without reporting metrics.
    Presence(String),
}

impl Signal {
    pub fn cause(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Reload => "reload",
            Self::Metrics(_) => "metrics",
            Self::Presence(_) => "presence",
        }
    }

    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::Metrics(id) | Self::Presence(id) => Some(id),
            Self::Init | Self::Reload => None,
        }
    }
}

/// Producer side; cheap to clone.
#[derive(Debug, Clone)]
pub struct CoalescerHandle {
    tx: mpsc::Sender<Signal>,
}

impl CoalescerHandle {
    /// Queue a signal without waiting. Returns `false` if it was dropped.
    pub fn signal(&self, signal: Signal) -> bool {
        match self.tx.try_send(signal) {
            Ok(()) => true,
            Err(TrySendError::Full(signal)) => {
                tracing::debug!(cause = signal.cause(), "signal queue full, dropping");
                false
            }
            Err(TrySendError::Closed(signal)) => {
                tracing::debug!(cause = signal.cause(), "coalescer stopped, dropping signal");
                false
            }
        }
    }
}

/// Create the signal queue. The receiver goes to [`Coalescer::new`].
pub fn channel(capacity: usize) -> (CoalescerHandle, mpsc::Receiver<Signal>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (CoalescerHandle { tx }, rx)
}

pub struct Coalescer {
    rx: mpsc::Receiver<Signal>,
    source: Arc<NodeSource>,
    registry: Arc<NodeRegistry>,
    sink: Arc<dyn StatusSink>,
}

impl Coalescer {
    pub fn new(
        rx: mpsc::Receiver<Signal>,
        source: Arc<NodeSource>,
        registry: Arc<NodeRegistry>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            rx,
            source,
            registry,
            sink,
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(
            self.run(shutdown)
                .instrument(tracing::info_span!("coalescer")),
        )
    }

    /// Consume signals until `shutdown` fires or every producer is gone.
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            let first = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                signal = self.rx.recv() => match signal {
                    Some(signal) => signal,
                    None => break,
                },
            };

            let mut last = first;
            let mut batch = 1usize;
            while let Ok(next) = self.rx.try_recv() {
                last = next;
                batch += 1;
            }
            self.pass(&last, batch);
        }
        tracing::info!("coalescer stopped");
    }

    /// One reconcile pass plus publish. `last` names the newest signal in
    /// the batch and becomes the snapshot's cause.
    fn pass(&self, last: &Signal, batch: usize) {
        let entries = self.source.current();
        let report = reconcile(&entries, &self.registry);

        if report.changed() || !matches!(last, Signal::Metrics(_) | Signal::Presence(_)) {
            tracing::info!(
                cause = last.cause(),
                batch,
                nodes = self.registry.len(),
                added = report.added.len(),
                refreshed = report.refreshed,
                evicted = report.evicted.len(),
                closed = report.closed,
                skipped = report.skipped.len(),
                "reconciled"
            );
        } else {
            tracing::debug!(
                cause = last.cause(),
                node_id = last.node_id().unwrap_or_default(),
                batch,
                "reconciled"
            );
        }

        let snapshot = self.registry.snapshot(last.cause());
        self.sink.publish(Arc::new(snapshot));
    }
}
