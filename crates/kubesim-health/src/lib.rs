//! kubesim-health — node liveness for kubesim.
//!
//! A node is healthy while `now - last_heartbeat < heartbeat_timeout`.
//! Health is derived on every read; the monitor additionally records it at
//! sweep time and reports transitions.
//!
//! # Architecture
//!
//! ```text
//! HealthMonitor (one background task)
//!   ├── ClusterState::sweep_health() → transitions + unhealthy nodes
//!   ├── HealthCallback per Unhealthy / Recovered / Evicted event
//!   └── EvictionPolicy (opt-in) → EvictFn → remove_node
//! ```
//!
//! Unhealthy nodes are skipped by the scheduler but keep their pods and
//! their capacity until removed, either explicitly or by eviction.

pub mod monitor;
pub mod policy;

pub use monitor::{BoxFuture, EvictFn, HealthCallback, HealthEvent, HealthMonitor, SweepReport};
pub use policy::EvictionPolicy;
