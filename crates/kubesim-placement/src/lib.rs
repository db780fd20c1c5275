//! kubesim scheduler — stateless bin-packing placement.
//!
//! Given the current allocation of every schedulable node and a pod's CPU
//! request, pick a node with one of three greedy heuristics. The crate
//! holds no cluster state: callers build [`NodeCandidate`]s from their own
//! model and apply the returned [`Placement`] themselves.
//!
//! # Components
//!
//! - **`candidate`** — per-node capacity view (remaining room, leftover after placement)
//! - **`placer`** — the [`Scheduler`] and its tie-break rules

pub mod candidate;
pub mod placer;

pub use candidate::NodeCandidate;
pub use placer::{Placement, Scheduler};
