//! kubesim-autoscale — utilization-driven node scaling.
//!
//! Reads a [`ClusterSnapshot`](kubesim_state::ClusterSnapshot), compares
//! healthy utilization against the configured thresholds and emits a
//! scaling decision. The decision is applied through a callback (the
//! daemon routes it to the node controller) or directly on the state.
//!
//! # Scaling Algorithm
//!
//! ```text
//! utilization = usage of healthy pods / capacity of healthy nodes * 100
//!
//! if utilization > high_threshold:
//!     ScaleOut(default_node_capacity)
//!
//! if utilization < low_threshold and healthy nodes >= 2 and nothing pending:
//!     ScaleIn(healthy node with the fewest pods, newest on ties)
//!
//! if scale_on_pending and pods are pending:
//!     ScaleOut(max(default_node_capacity, largest pending request))
//! ```
//!
//! A single cooldown window after any action, in either direction,
//! prevents thrashing.

pub mod scaler;

pub use scaler::{AutoscalePolicy, Autoscaler, ScaleCallback, ScaleDecision};
