pub mod reconcile;
pub mod registry;
pub mod source;

pub use reconcile::{reconcile, validate_entries, ReconcileReport};
pub use registry::{Binding, NodeRegistry, NodeStatus};
pub use source::{parse_entries, NodeSource};
