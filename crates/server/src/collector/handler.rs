//! Per-connection protocol state machine.
//!
//! ```text
//! open ──► Unauthenticated ──AUTHORIZE(id) ok──► Authorized(id) ──► closed
//!                 │                                    │
//!                 └── denied / bad frame ──► closed ◄──┘ CLOSE, bad frame,
//!                                                        foreign id, eviction
//! ```
//!
//! Handlers run on whichever task owns the connection and never wait on the
//! reconciler: they touch one registry entry and, at most, queue a signal.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use ss_protocol::{decode_frame, Inbound, Outbound};
use tokio_util::sync::CancellationToken;

use crate::coalescer::{CoalescerHandle, Signal};
use crate::error::{check_identity, AuthorizationError};
use crate::nodes::{NodeRegistry, NodeSource};
use crate::session::{ConnId, SessionState, SessionTable};

/// What the transport should do after a frame was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Bytes to write back, if any.
    pub out: Option<Bytes>,
    /// Close the connection once `out` is written.
    pub close: bool,
}

impl Reply {
    fn none() -> Self {
        Self {
            out: None,
            close: false,
        }
    }

    fn send(msg: Outbound) -> Self {
        Self {
            out: Some(msg.encode()),
            close: false,
        }
    }

    fn send_and_close(msg: Outbound) -> Self {
        Self {
            out: Some(msg.encode()),
            close: true,
        }
    }

    fn close() -> Self {
        Self {
            out: None,
            close: true,
        }
    }
}

/// The collector core shared by every connection.
pub struct Collector {
    source: Arc<NodeSource>,
    registry: Arc<NodeRegistry>,
    sessions: SessionTable,
    signals: CoalescerHandle,
    next_conn: AtomicU64,
}

impl Collector {
    pub fn new(
        source: Arc<NodeSource>,
        registry: Arc<NodeRegistry>,
        signals: CoalescerHandle,
    ) -> Self {
        Self {
            source,
            registry,
            sessions: SessionTable::new(),
            signals,
            next_conn: AtomicU64::new(1),
        }
    }

    pub fn next_conn_id(&self) -> ConnId {
        ConnId(self.next_conn.fetch_add(1, Ordering::Relaxed))
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// A connection was accepted. Returns the authorize prompt to write.
    pub fn on_open(&self, conn: ConnId, peer: SocketAddr, closer: CancellationToken) -> Bytes {
        self.sessions.open(conn, peer, closer);
        tracing::info!(conn_id = %conn, peer = %peer, "connection opened");
        Outbound::AuthorizePrompt.encode()
    }

    /// Handle one complete inbound frame.
    pub fn on_data(&self, conn: ConnId, frame: &[u8]) -> Reply {
        let msg = match decode_frame(frame) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(conn_id = %conn, error = %e, "bad frame, closing");
                return Reply::close();
            }
        };
        let Some(state) = self.sessions.state(conn) else {
            return Reply::close();
        };

        match (state, msg) {
            (SessionState::Unauthenticated, Inbound::Authorize { id }) => self.authorize(conn, &id),

            (SessionState::Authorized(bound), Inbound::Metrics { id, payload }) => {
                if let Err(e) = check_identity(&bound, &id) {
                    tracing::warn!(conn_id = %conn, error = %e, "identity mismatch, closing");
                    return Reply::close();
                }
                if !self.registry.record_metrics(&id, conn, payload) {
                    tracing::debug!(conn_id = %conn, node_id = %id, "node no longer bound, closing");
                    return Reply::close();
                }
                self.signals.signal(Signal::Metrics(id));
                Reply::none()
            }

            (SessionState::Authorized(bound), Inbound::Heartbeat { id }) => {
                if let Err(e) = check_identity(&bound, &id) {
                    tracing::warn!(conn_id = %conn, error = %e, "identity mismatch, closing");
                    return Reply::close();
                }
                match self.registry.touch(&id, conn) {
                    Some(came_online) => {
                        if came_online {
                            self.signals.signal(Signal::Presence(id));
                        }
                        Reply::send(Outbound::pong())
                    }
                    None => {
                        tracing::debug!(conn_id = %conn, node_id = %id, "node no longer bound, closing");
                        Reply::close()
                    }
                }
            }

            (_, Inbound::Close) => {
                tracing::debug!(conn_id = %conn, "agent closed the session");
                Reply::close()
            }

            (state, msg) => {
                tracing::warn!(
                    conn_id = %conn,
                    state = ?state,
                    kind = msg.kind().token(),
                    "frame not valid in this state, closing"
                );
                Reply::close()
            }
        }
    }

    /// The connection is gone, for whatever reason. Safe to call twice.
    pub fn on_close(&self, conn: ConnId) {
        let Some(session) = self.sessions.remove(conn) else {
            return;
        };
        match session.state {
            SessionState::Authorized(id) => {
                if self.registry.release(&id, conn) {
                    self.signals.signal(Signal::Presence(id.clone()));
                }
                tracing::info!(conn_id = %conn, node_id = %id, "connection closed");
            }
            SessionState::Unauthenticated => {
                tracing::info!(conn_id = %conn, "unauthenticated connection closed");
            }
        }
    }

    fn authorize(&self, conn: ConnId, id: &str) -> Reply {
        match self.try_authorize(conn, id) {
            Ok(()) => {
                tracing::info!(conn_id = %conn, node_id = %id, "authorized");
                Reply::send(Outbound::AuthorizeOk)
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn, error = %e, "authorize denied");
                Reply::send_and_close(Outbound::AuthorizeDenied(e.reason()))
            }
        }
    }

    fn try_authorize(&self, conn: ConnId, id: &str) -> Result<(), AuthorizationError> {
        let entry = self
            .source
            .lookup(id)
            .ok_or_else(|| AuthorizationError::NotFound(id.to_string()))?;
        // An entry the reconciler would skip is as good as absent.
        let config = entry
            .to_config()
            .map_err(|_| AuthorizationError::NotFound(id.to_string()))?;
        if !config.enabled {
            return Err(AuthorizationError::Disabled(id.to_string()));
        }

        let closer = self
            .sessions
            .get(conn)
            .map(|s| s.closer)
            .ok_or_else(|| AuthorizationError::NotFound(id.to_string()))?;
        self.registry.bind(id, conn, closer)?;
        self.sessions.bind(conn, id);
        Ok(())
    }
}
