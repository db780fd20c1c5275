//! Node provisioning — creates and destroys the environment behind a node.
//!
//! The cluster state is authoritative: a node exists once it is recorded
//! there, whatever happens to its environment. Provisioners are only ever
//! called after the state transition and never under the state lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use kubesim_core::{AgentConfig, NodeId};
use kubesim_state::ClusterState;

use crate::agent::{SimulatedAgent, UsageModel};

#[async_trait]
pub trait NodeProvisioner: Send + Sync {
    /// Bring up the environment for a node just added to the state.
    async fn provision(&self, node_id: &str, capacity: u32) -> anyhow::Result<()>;

    /// Tear down the environment of a node just removed from the state.
    async fn destroy(&self, node_id: &str) -> anyhow::Result<()>;
}

/// Provisioner for nodes whose heartbeats come from outside the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalProvisioner;

#[async_trait]
impl NodeProvisioner for ExternalProvisioner {
    async fn provision(&self, node_id: &str, capacity: u32) -> anyhow::Result<()> {
        debug!(%node_id, capacity, "node expected to report on its own");
        Ok(())
    }

    async fn destroy(&self, node_id: &str) -> anyhow::Result<()> {
        debug!(%node_id, "node environment left to its owner");
        Ok(())
    }
}

struct AgentSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Runs one [`SimulatedAgent`] task per node inside this process.
pub struct InProcessProvisioner {
    state: ClusterState,
    interval: Duration,
    model: UsageModel,
    /// node_id → running agent.
    agents: Arc<RwLock<HashMap<NodeId, AgentSlot>>>,
}

impl InProcessProvisioner {
    pub fn new(state: ClusterState, interval: Duration, model: UsageModel) -> Self {
        Self {
            state,
            interval,
            model,
            agents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn from_config(state: ClusterState, config: &AgentConfig) -> Self {
        Self::new(state, config.heartbeat_interval(), UsageModel::from_config(config))
    }

    /// Stop every agent (for graceful shutdown).
    pub async fn stop_all(&self) {
        let mut agents = self.agents.write().await;
        for (node_id, slot) in agents.drain() {
            let _ = slot.shutdown_tx.send(true);
            if let Err(e) = slot.handle.await {
                debug!(%node_id, error = %e, "agent task ended abnormally");
            }
        }
        info!("all agents stopped");
    }

    pub async fn active_agents(&self) -> Vec<NodeId> {
        let agents = self.agents.read().await;
        let mut ids: Vec<_> = agents.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn is_running(&self, node_id: &str) -> bool {
        self.agents.read().await.contains_key(node_id)
    }
}

#[async_trait]
impl NodeProvisioner for InProcessProvisioner {
    async fn provision(&self, node_id: &str, capacity: u32) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let agent = SimulatedAgent::new(node_id, self.state.clone(), self.interval, self.model.clone());
        let handle = tokio::spawn(agent.run(shutdown_rx));

        let mut agents = self.agents.write().await;
        if let Some(old) = agents.insert(node_id.to_string(), AgentSlot { handle, shutdown_tx }) {
            // Stop the old agent if one was running.
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }

        info!(%node_id, capacity, "agent provisioned");
        Ok(())
    }

    async fn destroy(&self, node_id: &str) -> anyhow::Result<()> {
        let slot = self.agents.write().await.remove(node_id);
        match slot {
            Some(slot) => {
                let _ = slot.shutdown_tx.send(true);
                slot.handle.abort();
                info!(%node_id, "agent stopped");
            }
            None => debug!(%node_id, "no agent to stop"),
        }
        Ok(())
    }
}
