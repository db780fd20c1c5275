//! ClusterController — node lifecycle on top of the cluster state.
//!
//! Every node change is first applied to the state, which is the
//! authoritative event; the provisioner is called afterwards, outside the
//! state lock. A failed provisioner call is logged and never rolls the
//! state back.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use kubesim_state::{AddNodeOutcome, ClusterResult, ClusterState, RemovalReport};

use crate::provisioner::NodeProvisioner;

#[derive(Clone)]
pub struct ClusterController {
    state: ClusterState,
    provisioner: Arc<dyn NodeProvisioner>,
}

impl ClusterController {
    pub fn new(state: ClusterState, provisioner: Arc<dyn NodeProvisioner>) -> Self {
        Self { state, provisioner }
    }

    pub fn state(&self) -> &ClusterState {
        &self.state
    }

    pub async fn add_node(&self, capacity: i64) -> ClusterResult<AddNodeOutcome> {
        let outcome = self.state.add_node(capacity)?;
        if let Err(e) = self.provisioner.provision(&outcome.node_id, outcome.capacity).await {
            warn!(node_id = %outcome.node_id, error = %e, "failed to provision node environment");
        }
        Ok(outcome)
    }

    pub async fn remove_node(&self, node_id: &str) -> ClusterResult<RemovalReport> {
        let report = self.state.remove_node(node_id)?;
        if let Err(e) = self.provisioner.destroy(node_id).await {
            warn!(%node_id, error = %e, "failed to destroy node environment");
        }
        Ok(report)
    }

    /// Remove a node that is still unhealthy for `window`, tearing down its
    /// environment only when it was actually removed.
    pub async fn evict_node(&self, node_id: &str, window: Duration) -> ClusterResult<Option<RemovalReport>> {
        let report = self.state.remove_node_if_unhealthy_for(node_id, window)?;
        if report.is_some() {
            if let Err(e) = self.provisioner.destroy(node_id).await {
                warn!(%node_id, error = %e, "failed to destroy node environment");
            }
        }
        Ok(report)
    }
}
