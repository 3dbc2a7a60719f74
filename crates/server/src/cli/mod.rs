pub mod config;
pub mod nodes;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use ss_domain::config::Config;

/// statusd: collects metrics and presence from node agents.
#[derive(Debug, Parser)]
#[command(name = "statusd", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the collector (default when no subcommand is given).
    Serve(ServeArgs),
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Node definition utilities.
    #[command(subcommand)]
    Nodes(NodesCommand),
    /// Print version information.
    Version,
}

/// Overrides applied on top of the config file for `serve`.
#[derive(Debug, Default, Args)]
pub struct ServeArgs {
    /// Collector listen host.
    #[arg(long)]
    pub host: Option<String>,
    /// Collector listen port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Status HTTP port.
    #[arg(long)]
    pub http_port: Option<u16>,
    /// Path to the nodes JSON file.
    #[arg(long)]
    pub nodes: Option<PathBuf>,
}

impl ServeArgs {
    pub fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(http_port) = self.http_port {
            config.server.http_port = http_port;
        }
        if let Some(nodes) = self.nodes {
            config.collector.nodes_file = nodes;
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

#[derive(Debug, Subcommand)]
pub enum NodesCommand {
    /// Load the nodes file and report entries that would be skipped.
    Check,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `SS_CONFIG` (or
/// `config.toml` by default). A missing file yields the defaults.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("SS_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = load_config_from(&config_path)?;
    Ok((config, config_path))
}

pub fn load_config_from(config_path: &str) -> anyhow::Result<Config> {
    if !std::path::Path::new(config_path).exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))
}
