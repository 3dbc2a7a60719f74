//! Shared types for the status collector: configuration, node definitions,
//! and the common error type.

pub mod config;
pub mod error;
pub mod node;

pub use error::{Error, Result};
