//! The statusd collector: accepts agent connections over the line protocol,
//! keeps a registry of configured nodes with their live status, and
//! publishes registry snapshots after each reconcile pass.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod coalescer;
pub mod collector;
pub mod error;
pub mod nodes;
pub mod session;
pub mod state;
pub mod status;
