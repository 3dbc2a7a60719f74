//! Agent-facing side of the collector: the per-connection state machine
//! and the TCP listener that drives it.

mod handler;
pub mod tcp;

pub use handler::{Collector, Reply};
pub use tcp::serve;
