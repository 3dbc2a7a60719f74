use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Listener addresses.
///
/// `host`/`port` is the line-protocol collector that agents connect to;
/// `http_host`/`http_port` serves the read-only status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_35601")]
    pub port: u16,
    #[serde(default = "d_any_host")]
    pub host: String,
    #[serde(default = "d_8080")]
    pub http_port: u16,
    #[serde(default = "d_local_host")]
    pub http_host: String,
    /// Upper bound on concurrent HTTP requests to the status endpoint.
    #[serde(default = "d_64")]
    pub http_max_concurrent: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 35601,
            host: "0.0.0.0".into(),
            http_port: 8080,
            http_host: "127.0.0.1".into(),
            http_max_concurrent: 64,
        }
    }
}

impl ServerConfig {
    pub fn collector_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_35601() -> u16 {
    35601
}
fn d_8080() -> u16 {
    8080
}
fn d_any_host() -> String {
    "0.0.0.0".into()
}
fn d_local_host() -> String {
    "127.0.0.1".into()
}
fn d_64() -> usize {
    64
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
