//! kubesim-state — the authoritative cluster model.
//!
//! Owns every node, running pod and pending pod. Other components go
//! through [`ClusterState`] and receive copies, never references.
//!
//! # Architecture
//!
//! ```text
//!  add_node ──► registry ──► reconcile (FIFO pass over the pending queue)
//!  remove_node ──► evacuate ──► Scheduler::select per pod ──► bind | enqueue
//!  launch_pod ──► Scheduler::select ──► bind | enqueue
//!  delete_pod ──► unbind ──► reconcile
//!  heartbeat ──► last_heartbeat, per-pod usage and health
//! ```
//!
//! Node health is derived on read from heartbeat recency; unhealthy nodes
//! are never placement targets but keep their pods until removed.
//! All timestamps come from a [`Clock`] so tests can drive time.

pub mod clock;
pub mod error;
mod reconcile;
mod recovery;
mod registry;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock, epoch_millis};
pub use error::{ClusterError, ClusterResult};
pub use store::{ClusterState, MAX_CLOCK_SKEW, MAX_POD_ID_LEN};
pub use types::*;
