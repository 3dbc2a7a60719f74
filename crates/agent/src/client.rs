//! Agent connection lifecycle: connect, answer the authorize prompt, then
//! report metrics and heartbeats until the connection drops or shutdown.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use ss_protocol::{decode_reply, FrameCodec, Inbound, Outbound, PONG};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::metrics::MetricsSource;
use crate::reconnect::ReconnectBackoff;

/// How long to wait for each handshake step before giving up on a connection.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Collector address, `host:port`.
    pub server: String,
    pub node_id: String,
    pub metrics_interval: Duration,
    pub heartbeat_interval: Duration,
    pub backoff: ReconnectBackoff,
    pub max_frame_bytes: usize,
}

impl AgentConfig {
    pub fn new(server: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            node_id: node_id.into(),
            metrics_interval: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(10),
            backoff: ReconnectBackoff::default(),
            max_frame_bytes: 4096,
        }
    }
}

pub struct Agent<S> {
    config: AgentConfig,
    source: S,
}

impl<S: MetricsSource> Agent<S> {
    pub fn new(mut config: AgentConfig, source: S) -> Self {
        config.backoff = config.backoff.seeded(&config.node_id);
        Self { config, source }
    }

    /// Run until `shutdown` fires or the reconnect policy gives up.
    ///
    /// Disconnects and authorize denials are both retried with back-off.
    /// The attempt counter only resets after a successful authorize.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), AgentError> {
        let mut attempt: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                return Err(AgentError::Shutdown);
            }

            match self.connect_and_run(&shutdown).await {
                Ok(authorized) => {
                    if shutdown.is_cancelled() {
                        return Err(AgentError::Shutdown);
                    }
                    tracing::info!(node_id = %self.config.node_id, authorized, "connection closed");
                    if authorized {
                        attempt = 0;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        node_id = %self.config.node_id,
                        attempt,
                        error = %e,
                        "connection lost"
                    );
                }
            }

            if self.config.backoff.should_give_up(attempt) {
                tracing::error!(attempts = attempt, "max reconnect attempts exhausted");
                return Err(AgentError::ReconnectExhausted(attempt));
            }

            let delay = self.config.backoff.delay_for_attempt(attempt);
            tracing::info!(delay_ms = delay.as_millis() as u64, attempt = attempt + 1, "reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => return Err(AgentError::Shutdown),
            }
            attempt += 1;
        }
    }

    /// One connection. Returns `Ok(true)` if it got past authorize before
    /// closing, `Ok(false)` if shutdown interrupted the handshake.
    async fn connect_and_run(&mut self, shutdown: &CancellationToken) -> Result<bool, AgentError> {
        let server = self.config.server.clone();
        tracing::info!(server = %server, node_id = %self.config.node_id, "connecting");

        let stream = tokio::select! {
            r = TcpStream::connect(&server) => r.map_err(|source| AgentError::Connect {
                addr: server.clone(),
                source,
            })?,
            _ = shutdown.cancelled() => return Ok(false),
        };
        let mut framed = Framed::new(stream, FrameCodec::agent(self.config.max_frame_bytes));

        // ── Handshake ───────────────────────────────────────────────
        match next_reply(&mut framed).await? {
            Outbound::AuthorizePrompt => {}
            other => {
                return Err(AgentError::Handshake(format!(
                    "expected authorize prompt, got {}",
                    other.kind().token()
                )))
            }
        }
        framed
            .send(
                Inbound::Authorize {
                    id: self.config.node_id.clone(),
                }
                .encode(),
            )
            .await?;
        match next_reply(&mut framed).await? {
            Outbound::AuthorizeOk => {}
            Outbound::AuthorizeDenied(reason) => return Err(AgentError::Denied(reason)),
            other => {
                return Err(AgentError::Handshake(format!(
                    "unexpected {} during authorize",
                    other.kind().token()
                )))
            }
        }
        tracing::info!(node_id = %self.config.node_id, "authorized");

        // ── Report loop ─────────────────────────────────────────────
        let mut metrics_tick = tokio::time::interval(self.config.metrics_interval);
        let mut heartbeat_tick = tokio::time::interval(self.config.heartbeat_interval);
        metrics_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    if let Err(e) = framed.send(Inbound::Close.encode()).await {
                        tracing::debug!(error = %e, "failed to send close");
                    }
                    return Ok(true);
                }
                _ = metrics_tick.tick() => {
                    let payload = self.source.payload()?;
                    framed
                        .send(Inbound::Metrics { id: self.config.node_id.clone(), payload }.encode())
                        .await?;
                }
                _ = heartbeat_tick.tick() => {
                    framed
                        .send(Inbound::Heartbeat { id: self.config.node_id.clone() }.encode())
                        .await?;
                }
                next = framed.next() => match next {
                    Some(Ok(frame)) => match decode_reply(&frame)? {
                        Outbound::Heartbeat(body) if body == PONG => tracing::trace!("pong"),
                        other => tracing::debug!(kind = other.kind().token(), "ignoring frame"),
                    },
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        tracing::info!("collector closed the connection");
                        return Ok(true);
                    }
                },
            }
        }
    }
}

async fn next_reply(framed: &mut Framed<TcpStream, FrameCodec>) -> Result<Outbound, AgentError> {
    match tokio::time::timeout(HANDSHAKE_TIMEOUT, framed.next()).await {
        Ok(Some(Ok(frame))) => Ok(decode_reply(&frame)?),
        Ok(Some(Err(e))) => Err(e.into()),
        Ok(None) => Err(AgentError::Handshake("connection closed during handshake".into())),
        Err(_) => Err(AgentError::Handshake("timed out".into())),
    }
}
