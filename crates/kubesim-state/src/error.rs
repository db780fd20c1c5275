//! Error types for cluster state operations.
//!
//! Only validation and lookup failures are errors. A pod that cannot be
//! placed is reported as `Placement::Pending`, and a stale or unknown
//! heartbeat as a [`HeartbeatAck`](crate::HeartbeatAck) variant.

use thiserror::Error;

/// Result type alias for cluster state operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors returned by [`ClusterState`](crate::ClusterState) operations.
///
/// Every error leaves the state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    #[error("invalid capacity {0}: must be a positive integer")]
    InvalidCapacity(i64),

    #[error("invalid cpu request {0}: must be a positive integer")]
    InvalidCpuRequest(i64),

    #[error("invalid pod id {pod_id:?}: {reason}")]
    InvalidPodId { pod_id: String, reason: &'static str },

    #[error("pod already exists: {0}")]
    DuplicatePod(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("pod {pod_id} not found on node {node_id}")]
    PodNotFound { node_id: String, pod_id: String },

    #[error("pending pod not found: {0}")]
    PendingPodNotFound(String),
}

impl ClusterError {
    /// Bad input, rejected before touching state.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ClusterError::InvalidCapacity(_)
                | ClusterError::InvalidCpuRequest(_)
                | ClusterError::InvalidPodId { .. }
                | ClusterError::DuplicatePod(_)
        )
    }

    /// Reference to an unknown node or pod.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ClusterError::NodeNotFound(_)
                | ClusterError::PodNotFound { .. }
                | ClusterError::PendingPodNotFound(_)
        )
    }
}
