//! End-to-end sessions against a real collector listener on loopback.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use ss_domain::config::Config;
use ss_protocol::{decode_reply, DenyReason, FrameCodec, Inbound, Outbound};
use ss_server::bootstrap::build_app_state;
use ss_server::coalescer::Signal;
use ss_server::collector;
use ss_server::state::AppState;
use ss_server::status::StatusSnapshot;

const TIMEOUT: Duration = Duration::from_secs(5);

fn node(id: &str, enabled: bool) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": format!("{id} box"),
        "location": "Amsterdam",
        "region": "eu-west",
        "enabled": enabled,
    })
}

struct Harness {
    state: AppState,
    addr: SocketAddr,
    nodes_path: PathBuf,
    snapshots: watch::Receiver<Arc<StatusSnapshot>>,
    _dir: tempfile::TempDir,
}

impl Harness {
    async fn start(nodes: Vec<serde_json::Value>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let nodes_path = dir.path().join("nodes.json");
        std::fs::write(&nodes_path, serde_json::to_string(&nodes).unwrap()).unwrap();

        let mut config = Config::default();
        config.collector.nodes_file = nodes_path.clone();
        let shutdown = CancellationToken::new();
        let state = build_app_state(Arc::new(config), shutdown.clone())
            .await
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(collector::serve(
            listener,
            state.collector.clone(),
            state.config.collector.max_frame_bytes,
            shutdown.child_token(),
        ));

        let mut harness = Self {
            snapshots: state.snapshots.subscribe(),
            state,
            addr,
            nodes_path,
            _dir: dir,
        };
        harness.wait_for(|s| s.cause == "init").await;
        harness
    }

    /// Wait until a published snapshot satisfies `pred`.
    async fn wait_for(&mut self, pred: impl Fn(&StatusSnapshot) -> bool) -> Arc<StatusSnapshot> {
        let rx = &mut self.snapshots;
        tokio::time::timeout(TIMEOUT, async {
            loop {
                {
                    let snap = rx.borrow_and_update().clone();
                    if pred(&snap) {
                        return snap;
                    }
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("no matching snapshot was published")
    }

    async fn rewrite_nodes(&self, nodes: Vec<serde_json::Value>) {
        std::fs::write(&self.nodes_path, serde_json::to_string(&nodes).unwrap()).unwrap();
        self.state.source.reload().unwrap();
        assert!(self.state.signals.signal(Signal::Reload));
    }
}

struct Agent {
    framed: Framed<TcpStream, FrameCodec>,
}

impl Agent {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut agent = Self {
            framed: Framed::new(stream, FrameCodec::agent(4096)),
        };
        assert_eq!(agent.recv().await, Some(Outbound::AuthorizePrompt));
        agent
    }

    async fn send(&mut self, msg: Inbound) {
        self.framed.send(msg.encode()).await.unwrap();
    }

    /// Next server frame, or `None` once the server closed the connection.
    async fn recv(&mut self) -> Option<Outbound> {
        match tokio::time::timeout(TIMEOUT, self.framed.next())
            .await
            .expect("server went silent")
        {
            Some(Ok(frame)) => Some(decode_reply(&frame).unwrap()),
            Some(Err(_)) | None => None,
        }
    }

    async fn authorize(&mut self, id: &str) -> Option<Outbound> {
        self.send(Inbound::Authorize { id: id.into() }).await;
        self.recv().await
    }

    async fn expect_closed(&mut self) {
        assert_eq!(self.recv().await, None, "connection should be closed");
    }
}

#[tokio::test]
async fn heartbeat_metrics_and_close_round_trip() {
    let mut h = Harness::start(vec![node("n1", true)]).await;
    let mut a = Agent::connect(h.addr).await;

    assert_eq!(a.authorize("n1").await, Some(Outbound::AuthorizeOk));

    a.send(Inbound::Heartbeat { id: "n1".into() }).await;
    assert_eq!(a.recv().await, Some(Outbound::pong()));
    h.wait_for(|s| s.node("n1").is_some_and(|n| n.online)).await;

    a.send(Inbound::Metrics {
        id: "n1".into(),
        payload: "cpu=10".into(),
    })
    .await;
    let snap = h
        .wait_for(|s| s.node("n1").is_some_and(|n| n.metrics == "cpu=10"))
        .await;
    assert!(snap.node("n1").unwrap().online);

    a.send(Inbound::Close).await;
    a.expect_closed().await;
    h.wait_for(|s| {
        s.node("n1")
            .is_some_and(|n| !n.online && n.metrics.is_empty())
    })
    .await;
    assert!(h.state.collector.sessions().is_empty());
}

#[tokio::test]
async fn unknown_and_disabled_ids_are_denied() {
    let h = Harness::start(vec![node("n1", true), node("off", false)]).await;

    let mut a = Agent::connect(h.addr).await;
    assert_eq!(
        a.authorize("ghost").await,
        Some(Outbound::AuthorizeDenied(DenyReason::NotFound))
    );
    a.expect_closed().await;

    let mut b = Agent::connect(h.addr).await;
    assert_eq!(
        b.authorize("off").await,
        Some(Outbound::AuthorizeDenied(DenyReason::Disabled))
    );
    b.expect_closed().await;
}

#[tokio::test]
async fn second_session_for_a_bound_id_is_refused() {
    let h = Harness::start(vec![node("n1", true)]).await;
    let mut first = Agent::connect(h.addr).await;
    assert_eq!(first.authorize("n1").await, Some(Outbound::AuthorizeOk));

    let mut second = Agent::connect(h.addr).await;
    assert_eq!(
        second.authorize("n1").await,
        Some(Outbound::AuthorizeDenied(DenyReason::AlreadyBound))
    );
    second.expect_closed().await;

    // The original session is untouched.
    first.send(Inbound::Heartbeat { id: "n1".into() }).await;
    assert_eq!(first.recv().await, Some(Outbound::pong()));
}

#[tokio::test]
async fn removed_node_is_disconnected_and_unpublished() {
    let mut h = Harness::start(vec![node("n1", true)]).await;
    let mut a = Agent::connect(h.addr).await;
    assert_eq!(a.authorize("n1").await, Some(Outbound::AuthorizeOk));

    h.rewrite_nodes(vec![]).await;
    a.expect_closed().await;
    let snap = h.wait_for(|s| s.cause == "reload").await;
    assert!(snap.node("n1").is_none());

    // Later snapshots keep it out too.
    h.state.signals.signal(Signal::Reload);
    let snap = h.wait_for(|s| s.node("n1").is_none()).await;
    assert!(snap.nodes.is_empty());
}

#[tokio::test]
async fn speaking_for_another_node_closes_the_connection() {
    let mut h = Harness::start(vec![node("n1", true), node("n2", true)]).await;
    let mut a = Agent::connect(h.addr).await;
    assert_eq!(a.authorize("n1").await, Some(Outbound::AuthorizeOk));

    a.send(Inbound::Metrics {
        id: "n2".into(),
        payload: "spoofed".into(),
    })
    .await;
    a.expect_closed().await;

    let snap = h.wait_for(|s| s.node("n1").is_some_and(|n| !n.online)).await;
    assert_eq!(snap.node("n2").unwrap().metrics, "");
}

#[tokio::test]
async fn dropped_connection_marks_node_offline() {
    let mut h = Harness::start(vec![node("n1", true)]).await;
    let mut a = Agent::connect(h.addr).await;
    a.authorize("n1").await;
    a.send(Inbound::Metrics {
        id: "n1".into(),
        payload: "load=1".into(),
    })
    .await;
    h.wait_for(|s| s.node("n1").is_some_and(|n| n.online)).await;

    drop(a);
    h.wait_for(|s| {
        s.node("n1")
            .is_some_and(|n| !n.online && n.metrics.is_empty())
    })
    .await;

    // The id is free again.
    let mut b = Agent::connect(h.addr).await;
    assert_eq!(b.authorize("n1").await, Some(Outbound::AuthorizeOk));
}

#[tokio::test]
async fn garbage_before_authorize_closes_the_connection() {
    let h = Harness::start(vec![node("n1", true)]).await;
    let mut a = Agent::connect(h.addr).await;
    a.framed
        .send(bytes::Bytes::from_static(b"HELLO\n"))
        .await
        .unwrap();
    a.expect_closed().await;
}

#[tokio::test]
async fn shutdown_closes_live_connections() {
    let h = Harness::start(vec![node("n1", true)]).await;
    let mut a = Agent::connect(h.addr).await;
    assert_eq!(a.authorize("n1").await, Some(Outbound::AuthorizeOk));

    h.state.shutdown.cancel();
    a.expect_closed().await;
}
