//! `ss-agent`: reports host metrics and heartbeats to a statusd collector.
//!
//! # Connection flow
//!
//! 1. Connect TCP to the collector
//! 2. Wait for the `AUTHORIZE` prompt, answer with the node id
//! 3. On `AUTHORIZE_OK`: send `METRICS` every metrics interval and
//!    `HEARTBEAT` every heartbeat interval; the collector answers pongs
//! 4. On denial or disconnect: reconnect with jittered exponential back-off
//! 5. On shutdown: send `CLOSE` and exit

pub mod client;
pub mod error;
pub mod metrics;
pub mod reconnect;

pub use client::{Agent, AgentConfig};
pub use error::AgentError;
pub use metrics::{HostMetrics, MetricsSource, SysinfoSource};
pub use reconnect::ReconnectBackoff;
