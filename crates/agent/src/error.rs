use ss_protocol::{DenyReason, FrameError};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    #[error("handshake: {0}")]
    Handshake(String),
    #[error("authorize denied: {0:?}")]
    Denied(DenyReason),
    #[error("metrics: {0}")]
    Metrics(#[from] serde_json::Error),
    #[error("reconnect exhausted after {0} attempts")]
    ReconnectExhausted(u32),
    #[error("shutdown")]
    Shutdown,
}
