//! Placement engine — picks a node for a single CPU request.
//!
//! A candidate qualifies when its remaining room covers the request.
//! Among qualifying candidates:
//! 1. **first-fit** takes the earliest one
//! 2. **best-fit** takes the smallest leftover (tightest fit)
//! 3. **worst-fit** takes the largest leftover (loosest fit)
//!
//! Ties always go to the earliest candidate, so the same inputs yield the
//! same node every time.

use std::cmp::Reverse;

use serde::Serialize;
use tracing::debug;

use kubesim_core::SchedulingAlgorithm;

use crate::candidate::NodeCandidate;

/// Outcome of a placement attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Placement {
    /// Place the pod on this node.
    Assigned { node_id: String },
    /// No candidate has room. Callers queue the pod; this is not an error.
    NoCapacity,
}

impl Placement {
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Placement::Assigned { node_id } => Some(node_id),
            Placement::NoCapacity => None,
        }
    }
}

/// Stateless scheduler configured with one heuristic for its lifetime.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scheduler {
    algorithm: SchedulingAlgorithm,
}

impl Scheduler {
    pub fn new(algorithm: SchedulingAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> SchedulingAlgorithm {
        self.algorithm
    }

    /// Choose a node for `cpu_request` among `candidates`.
    pub fn place(&self, cpu_request: u32, candidates: &[NodeCandidate]) -> Placement {
        match self.select(cpu_request, candidates) {
            Some(idx) => Placement::Assigned {
                node_id: candidates[idx].node_id.clone(),
            },
            None => Placement::NoCapacity,
        }
    }

    /// Index of the chosen candidate, or `None` when nothing fits.
    pub fn select(&self, cpu_request: u32, candidates: &[NodeCandidate]) -> Option<usize> {
        let mut fitting = candidates
            .iter()
            .enumerate()
            .filter_map(|(idx, node)| node.leftover(cpu_request).map(|left| (idx, left)));

        let chosen = match self.algorithm {
            SchedulingAlgorithm::FirstFit => fitting.next(),
            SchedulingAlgorithm::BestFit => fitting.min_by_key(|&(idx, left)| (left, idx)),
            SchedulingAlgorithm::WorstFit => {
                fitting.max_by_key(|&(idx, left)| (left, Reverse(idx)))
            }
        };

        match chosen {
            Some((idx, left)) => {
                debug!(
                    algorithm = %self.algorithm,
                    node = %candidates[idx].node_id,
                    cpu_request,
                    leftover = left,
                    "placement selected"
                );
                Some(idx)
            }
            None => {
                debug!(
                    algorithm = %self.algorithm,
                    cpu_request,
                    candidates = candidates.len(),
                    "no candidate has capacity"
                );
                None
            }
        }
    }
}
