use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Smallest frame limit accepted by validation; an authorize frame with a
/// reasonable id must always fit.
pub const MIN_FRAME_BYTES: usize = 64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// JSON file holding the node definitions (array of objects).
    #[serde(default = "d_nodes_file")]
    pub nodes_file: PathBuf,
    /// How often the nodes file is checked for modification.
    #[serde(default = "d_5")]
    pub reload_interval_secs: u64,
    /// Capacity of the change-signal queue feeding the reconciler.
    /// Signals raised while the queue is full are dropped.
    #[serde(default = "d_64")]
    pub signal_queue: usize,
    /// Largest inbound frame accepted before the connection is closed.
    #[serde(default = "d_65536")]
    pub max_frame_bytes: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            nodes_file: d_nodes_file(),
            reload_interval_secs: 5,
            signal_queue: 64,
            max_frame_bytes: 65_536,
        }
    }
}

impl CollectorConfig {
    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs)
    }
}

fn d_nodes_file() -> PathBuf {
    PathBuf::from("nodes.json")
}
fn d_5() -> u64 {
    5
}
fn d_64() -> usize {
    64
}
fn d_65536() -> usize {
    65_536
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_uses_defaults() {
        let cfg: CollectorConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.nodes_file, PathBuf::from("nodes.json"));
        assert_eq!(cfg.reload_interval(), Duration::from_secs(5));
        assert_eq!(cfg.signal_queue, 64);
        assert_eq!(cfg.max_frame_bytes, 65_536);
    }

    #[test]
    fn overrides_parse() {
        let toml_str = r#"
            nodes_file = "/etc/statusd/nodes.json"
            reload_interval_secs = 30
            signal_queue = 8
        "#;
        let cfg: CollectorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.nodes_file, PathBuf::from("/etc/statusd/nodes.json"));
        assert_eq!(cfg.reload_interval_secs, 30);
        assert_eq!(cfg.signal_queue, 8);
    }
}
