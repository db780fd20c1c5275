//! Capacity view of a schedulable node.

use serde::{Deserialize, Serialize};

/// A node the scheduler may place a pod on.
///
/// Candidates are expected in node creation order: the scheduler breaks
/// every tie in favour of the earlier entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCandidate {
    pub node_id: String,
    /// Total CPU units of the node.
    pub capacity: u32,
    /// Sum of the CPU requests of the pods already assigned to it.
    pub allocated: u32,
}

impl NodeCandidate {
    pub fn new(node_id: impl Into<String>, capacity: u32, allocated: u32) -> Self {
        Self {
            node_id: node_id.into(),
            capacity,
            allocated,
        }
    }

    /// Units still free on the node.
    pub fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.allocated)
    }

    /// Whether a pod requesting `cpu_request` units fits.
    pub fn fits(&self, cpu_request: u32) -> bool {
        self.remaining() >= cpu_request
    }

    /// Units left after placing `cpu_request`, or `None` if it does not fit.
    pub fn leftover(&self, cpu_request: u32) -> Option<u32> {
        self.remaining().checked_sub(cpu_request)
    }

    /// Record a placement on this candidate.
    pub fn reserve(&mut self, cpu_request: u32) {
        self.allocated = self.allocated.saturating_add(cpu_request);
    }
}
