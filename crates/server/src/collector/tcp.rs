//! TCP transport for the collector.
//!
//! One task per connection owns the socket. It reads frames through
//! [`FrameCodec`], feeds them to the [`Collector`] and writes back whatever
//! the collector answers. Server-initiated closes (eviction, disable,
//! shutdown) arrive through the connection's `closer` token.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use ss_protocol::FrameCodec;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::Collector;
use crate::session::ConnId;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Accept loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accept agent connections until `shutdown` fires. Every connection gets a
/// child token of `shutdown`, so cancelling it closes them all.
pub async fn serve(
    listener: TcpListener,
    collector: Arc<Collector>,
    max_frame_bytes: usize,
    shutdown: CancellationToken,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    // Usually fd exhaustion; back off instead of spinning.
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
        };

        let conn = collector.next_conn_id();
        let closer = shutdown.child_token();
        let span = tracing::info_span!("conn", conn_id = %conn, peer = %peer);
        tokio::spawn(
            handle_connection(stream, peer, conn, closer, collector.clone(), max_frame_bytes)
                .instrument(span),
        );
    }
    tracing::info!("collector listener stopped");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    conn: ConnId,
    closer: CancellationToken,
    collector: Arc<Collector>,
    max_frame_bytes: usize,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "set_nodelay failed");
    }
    let mut framed = Framed::new(stream, FrameCodec::server(max_frame_bytes));

    let prompt = collector.on_open(conn, peer, closer.clone());
    if let Err(e) = framed.send(prompt).await {
        tracing::debug!(error = %e, "failed to send authorize prompt");
        collector.on_close(conn);
        return;
    }

    loop {
        let frame = tokio::select! {
            biased;
            _ = closer.cancelled() => {
                tracing::debug!("closed by server");
                break;
            }
            next = framed.next() => match next {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "read failed, closing");
                    break;
                }
                None => break,
            },
        };

        let reply = collector.on_data(conn, &frame);
        if let Some(out) = reply.out {
            if let Err(e) = framed.send(out).await {
                tracing::debug!(error = %e, "write failed, closing");
                break;
            }
        }
        if reply.close {
            break;
        }
    }

    collector.on_close(conn);
    if let Err(e) = framed.get_mut().shutdown().await {
        tracing::debug!(error = %e, "socket shutdown failed");
    }
}
