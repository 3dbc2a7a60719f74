use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig as _;

use ss_domain::config::{Config, ObservabilityConfig};
use ss_server::cli::{Cli, Command, ConfigCommand, NodesCommand, ServeArgs};
use ss_server::{api, bootstrap, collector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None => serve(ServeArgs::default()).await,
        Some(Command::Serve(args)) => serve(args).await,
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = ss_server::cli::load_config()?;
            if !ss_server::cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = ss_server::cli::load_config()?;
            ss_server::cli::config::show(&config)
        }
        Some(Command::Nodes(NodesCommand::Check)) => {
            init_cli_tracing();
            let (config, _) = ss_server::cli::load_config()?;
            if !ss_server::cli::nodes::check(&config)? {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Version) => {
            println!("statusd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let (mut config, _config_path) = ss_server::cli::load_config()?;
    args.apply(&mut config);
    let tracer_provider = init_tracing(&config.observability);
    run_server(Arc::new(config), tracer_provider).await
}

/// Initialize structured JSON tracing (only for the `serve` command).
///
/// When `otlp_endpoint` is configured, an OpenTelemetry layer is added so
/// that every `tracing` span is also exported via OTLP/gRPC. The returned
/// provider must be shut down on exit to flush pending spans.
fn init_tracing(obs: &ObservabilityConfig) -> Option<opentelemetry_sdk::trace::SdkTracerProvider> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ss_server=debug"));

    let fmt_layer = tracing_subscriber::fmt::layer().json();

    match &obs.otlp_endpoint {
        Some(endpoint) => {
            let exporter = match opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()
            {
                Ok(e) => e,
                Err(e) => {
                    eprintln!(
                        "WARNING: failed to create OTLP exporter for {endpoint}: {e}; \
                         starting without OpenTelemetry"
                    );
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(fmt_layer)
                        .init();
                    return None;
                }
            };

            let resource = opentelemetry_sdk::Resource::builder()
                .with_service_name(obs.service_name.clone())
                .build();

            let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
                .with_batch_exporter(exporter)
                .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(
                    obs.sample_rate,
                ))
                .with_resource(resource)
                .build();

            let otel_layer =
                tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer("statusd"));

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .with(otel_layer)
                .init();

            Some(tracer_provider)
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();

            None
        }
    }
}

/// Compact stderr-only tracing for one-shot commands.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn run_server(
    config: Arc<Config>,
    tracer_provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "statusd starting");

    // ── Build shared state & spawn background loops ──────────────────
    let shutdown = CancellationToken::new();
    let state = bootstrap::build_app_state(config.clone(), shutdown.clone()).await?;
    bootstrap::spawn_background_tasks(&state);

    // ── Collector listener ───────────────────────────────────────────
    let collector_addr = config.server.collector_addr();
    let listener = tokio::net::TcpListener::bind(&collector_addr)
        .await
        .with_context(|| format!("binding collector to {collector_addr}"))?;
    tracing::info!(addr = %collector_addr, "collector listening");
    let collector_task = tokio::spawn(collector::serve(
        listener,
        state.collector.clone(),
        config.collector.max_frame_bytes,
        shutdown.child_token(),
    ));

    // ── Status HTTP ──────────────────────────────────────────────────
    let http_addr = config.server.http_addr();
    let http_listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("binding status endpoint to {http_addr}"))?;
    tracing::info!(addr = %http_addr, "status endpoint listening");

    let http_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        http_shutdown.cancel();
    });

    let app = api::router(state.clone());
    let graceful = shutdown.clone();
    axum::serve(http_listener, app)
        .with_graceful_shutdown(async move { graceful.cancelled().await })
        .await
        .context("status endpoint error")?;

    // ── Post-shutdown ────────────────────────────────────────────────
    if let Err(e) = collector_task.await {
        tracing::warn!(error = %e, "collector task ended abnormally");
    }
    tracing::info!(sessions = state.collector.sessions().len(), "collector stopped");

    if let Some(provider) = tracer_provider {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = ?e, "OpenTelemetry tracer provider shutdown failed");
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                let _ = ctrl_c.await;
                tracing::info!("received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("received SIGINT, shutting down");
    }
}
