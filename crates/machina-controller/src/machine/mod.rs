//! Machine lifecycle
//!
//! [`reconcile`] drives one machine toward its desired instance. The other
//! modules are the steps it is built from: resolving references, building the
//! launch request, finding and terminating instances, and keeping tags, load
//! balancer targets and addresses current.

pub mod addresses;
pub mod dedicated_hosts;
pub mod instances;
pub mod launcher;
pub mod load_balancers;
pub mod reconciler;
pub mod resolver;
pub mod scope;

// Re-exports
pub use reconciler::{REASON_INSTANCE_MISSING, REASON_INSTANCE_TERMINATED, reconcile};
pub use scope::MachineScope;
