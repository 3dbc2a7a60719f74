//! Reference agent for statusd.
//!
//! Usage:
//!   SS_NODE_ID=n1 ss-agent --server collector.example:35601

use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use ss_agent::{Agent, AgentConfig, AgentError, ReconnectBackoff, SysinfoSource};

/// Report this host's metrics to a statusd collector.
#[derive(Debug, Parser)]
#[command(name = "ss-agent", version, about)]
struct Args {
    /// Collector address (`host:port`).
    #[arg(long, env = "SS_SERVER", default_value = "127.0.0.1:35601")]
    server: String,
    /// Node id as configured in the collector's nodes file.
    #[arg(long, env = "SS_NODE_ID")]
    id: String,
    /// Seconds between metrics reports.
    #[arg(long, default_value_t = 2)]
    interval_secs: u64,
    /// Seconds between heartbeats.
    #[arg(long, default_value_t = 10)]
    heartbeat_secs: u64,
    /// Give up after this many failed reconnects (0 = never).
    #[arg(long, default_value_t = 0)]
    max_attempts: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let args = Args::parse();
    if args.id.trim().is_empty() {
        anyhow::bail!("--id must not be empty");
    }

    let mut config = AgentConfig::new(args.server, args.id);
    config.metrics_interval = Duration::from_secs(args.interval_secs.max(1));
    config.heartbeat_interval = Duration::from_secs(args.heartbeat_secs.max(1));
    config.backoff = ReconnectBackoff {
        max_attempts: args.max_attempts,
        ..Default::default()
    };

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("received SIGINT, closing");
                on_signal.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "failed to listen for SIGINT"),
        }
    });

    match Agent::new(config, SysinfoSource::new()).run(shutdown).await {
        Ok(()) | Err(AgentError::Shutdown) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
