//! Error taxonomy for the collector core.
//!
//! Only [`AuthorizationError`] is ever reported to an agent (as an explicit
//! denial frame). Everything else is logged and, at most, closes the
//! offending connection.

use ss_protocol::DenyReason;

/// An authorize attempt that must be refused before the connection closes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorizationError {
    #[error("node {0:?} is not configured")]
    NotFound(String),

    #[error("node {0:?} is disabled")]
    Disabled(String),

    #[error("node {0:?} is already bound to a live connection")]
    AlreadyBound(String),
}

impl AuthorizationError {
    pub fn reason(&self) -> DenyReason {
        match self {
            Self::NotFound(_) => DenyReason::NotFound,
            Self::Disabled(_) => DenyReason::Disabled,
            Self::AlreadyBound(_) => DenyReason::AlreadyBound,
        }
    }
}

/// An authorized connection sent a frame for a node other than its own.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("connection bound to {bound:?} spoke for {claimed:?}")]
pub struct IdentityMismatchError {
    pub bound: String,
    pub claimed: String,
}

/// Check that a frame's id matches the id its session is bound to.
pub fn check_identity(bound: &str, claimed: &str) -> Result<(), IdentityMismatchError> {
    if bound == claimed {
        Ok(())
    } else {
        Err(IdentityMismatchError {
            bound: bound.to_string(),
            claimed: claimed.to_string(),
        })
    }
}

/// A node definition the reconciler had to skip.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconciliationError {
    #[error("nodes[{index}]: missing required field `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("nodes[{index}]: duplicate id {id:?}")]
    DuplicateId { index: usize, id: String },
}
