//! Per-connection session records.
//!
//! A session exists from the moment a connection is accepted until its close
//! hook runs. Only the owning connection's events mutate its entry.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Transport-level identity of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "node_id", rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    Authorized(String),
}

impl SessionState {
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::Authorized(id) => Some(id),
            Self::Unauthenticated => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub conn_id: ConnId,
    pub peer: SocketAddr,
    /// Random id for correlating log lines across reconnects of one agent.
    pub session_id: String,
    pub opened_at: DateTime<Utc>,
    pub state: SessionState,
    /// Cancelling this closes the connection from the server side.
    pub closer: CancellationToken,
}

/// Summary info for listing live sessions.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub conn_id: ConnId,
    pub peer: SocketAddr,
    pub session_id: String,
    pub opened_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: SessionState,
}

#[derive(Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<ConnId, Session>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly accepted connection in the `Unauthenticated` state.
    pub fn open(&self, conn_id: ConnId, peer: SocketAddr, closer: CancellationToken) {
        let session = Session {
            conn_id,
            peer,
            session_id: uuid::Uuid::new_v4().to_string(),
            opened_at: Utc::now(),
            state: SessionState::Unauthenticated,
            closer,
        };
        self.sessions.write().insert(conn_id, session);
    }

    pub fn get(&self, conn_id: ConnId) -> Option<Session> {
        self.sessions.read().get(&conn_id).cloned()
    }

    pub fn state(&self, conn_id: ConnId) -> Option<SessionState> {
        self.sessions.read().get(&conn_id).map(|s| s.state.clone())
    }

    /// Move a session to `Authorized(node_id)`. Returns `false` if the
    /// session is gone.
    pub fn bind(&self, conn_id: ConnId, node_id: &str) -> bool {
        match self.sessions.write().get_mut(&conn_id) {
            Some(session) => {
                session.state = SessionState::Authorized(node_id.to_string());
                true
            }
            None => false,
        }
    }

    /// Drop the session. Returns it if it was still present.
    pub fn remove(&self, conn_id: ConnId) -> Option<Session> {
        self.sessions.write().remove(&conn_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let mut out: Vec<SessionInfo> = self
            .sessions
            .read()
            .values()
            .map(|s| SessionInfo {
                conn_id: s.conn_id,
                peer: s.peer,
                session_id: s.session_id.clone(),
                opened_at: s.opened_at,
                state: s.state.clone(),
            })
            .collect();
        out.sort_by_key(|s| s.conn_id);
        out
    }
}
