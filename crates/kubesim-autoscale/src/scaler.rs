//! Autoscaler — grows or shrinks the node fleet from cluster utilization.
//!
//! Node creation and removal go through the same operations an operator
//! would use, so a scale-in evacuates pods exactly like a manual delete.

use std::cmp::Reverse;
use std::time::Duration;

use tracing::{debug, info, warn};

use kubesim_core::{AutoscaleConfig, NodeId, Timestamp};
use kubesim_state::{ClusterSnapshot, ClusterState};

/// A scaling decision for the whole cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Add a node with this capacity.
    ScaleOut { capacity: u32 },
    /// Remove this node.
    ScaleIn { node_id: NodeId },
    NoChange,
}

/// Callback type for performing scaling actions.
pub type ScaleCallback = Box<dyn Fn(ScaleDecision) -> BoxFuture + Send + Sync>;

type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>;

/// Thresholds are percentages of healthy capacity.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoscalePolicy {
    pub high_threshold: f64,
    pub low_threshold: f64,
    pub default_node_capacity: u32,
    pub cooldown: Duration,
    pub scale_on_pending: bool,
}

impl AutoscalePolicy {
    pub fn from_config(config: &AutoscaleConfig) -> Self {
        Self {
            high_threshold: config.high_threshold,
            low_threshold: config.low_threshold,
            default_node_capacity: config.default_node_capacity,
            cooldown: config.cooldown(),
            scale_on_pending: config.scale_on_pending,
        }
    }
}

impl Default for AutoscalePolicy {
    fn default() -> Self {
        Self::from_config(&AutoscaleConfig::default())
    }
}

pub struct Autoscaler {
    state: ClusterState,
    policy: AutoscalePolicy,
    /// When the last scaling action was decided.
    last_action: Option<Timestamp>,
    scale_fn: Option<ScaleCallback>,
}

impl Autoscaler {
    pub fn new(state: ClusterState, policy: AutoscalePolicy) -> Self {
        Self {
            state,
            policy,
            last_action: None,
            scale_fn: None,
        }
    }

    /// Set the callback used to perform scaling. Without one, decisions
    /// are applied directly on the cluster state.
    pub fn with_scale_fn(mut self, f: ScaleCallback) -> Self {
        self.scale_fn = Some(f);
        self
    }

    pub fn policy(&self) -> &AutoscalePolicy {
        &self.policy
    }

    fn in_cooldown(&self, now: Timestamp) -> bool {
        let cooldown = u64::try_from(self.policy.cooldown.as_millis()).unwrap_or(u64::MAX);
        self.last_action
            .is_some_and(|at| now.saturating_sub(at) < cooldown)
    }

    /// Decide what to do for `snapshot`, starting the cooldown on action.
    pub fn evaluate(&mut self, snapshot: &ClusterSnapshot) -> ScaleDecision {
        let now = snapshot.taken_at;
        if self.in_cooldown(now) {
            debug!(last_action = ?self.last_action, "autoscaler in cooldown");
            return ScaleDecision::NoChange;
        }

        let utilization = snapshot.utilization_pct;
        let healthy_nodes = snapshot.totals.healthy_nodes;
        let pending = snapshot.pending.len();

        let decision = if healthy_nodes > 0 && utilization > self.policy.high_threshold {
            debug!(utilization, high = self.policy.high_threshold, "utilization above threshold");
            ScaleDecision::ScaleOut {
                capacity: self.policy.default_node_capacity,
            }
        } else if healthy_nodes >= 2 && pending == 0 && utilization < self.policy.low_threshold {
            debug!(utilization, low = self.policy.low_threshold, "utilization below threshold");
            match scale_in_candidate(snapshot) {
                Some(node_id) => ScaleDecision::ScaleIn { node_id },
                None => ScaleDecision::NoChange,
            }
        } else if self.policy.scale_on_pending && pending > 0 {
            let largest = snapshot
                .pending
                .iter()
                .map(|p| p.cpu_request)
                .max()
                .unwrap_or(0);
            debug!(pending, largest, "pods waiting for capacity");
            ScaleDecision::ScaleOut {
                capacity: self.policy.default_node_capacity.max(largest),
            }
        } else {
            ScaleDecision::NoChange
        };

        if decision != ScaleDecision::NoChange {
            self.last_action = Some(now);
        }
        decision
    }

    /// Evaluate the current state and carry out the decision.
    pub async fn evaluate_and_apply(&mut self) -> anyhow::Result<ScaleDecision> {
        let snapshot = self.state.snapshot();
        let decision = self.evaluate(&snapshot);
        if decision == ScaleDecision::NoChange {
            return Ok(decision);
        }

        info!(
            ?decision,
            utilization = snapshot.utilization_pct,
            healthy_nodes = snapshot.totals.healthy_nodes,
            pending = snapshot.pending.len(),
            "scaling"
        );

        match &self.scale_fn {
            Some(scale_fn) => {
                if let Err(e) = scale_fn(decision.clone()).await {
                    warn!(?decision, error = %e, "scaling action failed");
                }
            }
            None => match &decision {
                ScaleDecision::ScaleOut { capacity } => {
                    self.state.add_node(i64::from(*capacity))?;
                }
                ScaleDecision::ScaleIn { node_id } => {
                    self.state.remove_node(node_id)?;
                }
                ScaleDecision::NoChange => {}
            },
        }
        Ok(decision)
    }

    /// Run the autoscaler loop.
    pub async fn run(&mut self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            high = self.policy.high_threshold,
            low = self.policy.low_threshold,
            cooldown_secs = self.policy.cooldown.as_secs(),
            "autoscaler started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.evaluate_and_apply().await {
                        tracing::error!(error = %e, "autoscaler evaluation failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }
}

/// Healthy node hosting the fewest pods; the newest one on ties.
fn scale_in_candidate(snapshot: &ClusterSnapshot) -> Option<NodeId> {
    snapshot
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.healthy)
        .min_by_key(|(idx, n)| (n.pod_count(), Reverse(*idx)))
        .map(|(_, n)| n.node_id.clone())
}
