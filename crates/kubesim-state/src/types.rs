//! Domain types for the cluster state.
//!
//! `Node`, `Pod` and `PendingPod` are owned exclusively by
//! [`ClusterState`](crate::ClusterState). Everything handed to callers is a
//! copy: status views, snapshots and operation reports.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use kubesim_core::{NodeId, PodId, SchedulingAlgorithm, Timestamp};

use crate::clock::{duration_millis, millis_to_secs};

// ── Entities ──────────────────────────────────────────────────────

/// A capacity-bounded placement target.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub capacity: u32,
    pub pods: HashSet<PodId>,
    /// Never moves backwards.
    pub last_heartbeat: Timestamp,
    pub created_at: Timestamp,
    /// Health as recorded by the last sweep.
    pub swept_healthy: bool,
}

impl Node {
    pub(crate) fn new(id: NodeId, capacity: u32, now: Timestamp) -> Self {
        Self {
            id,
            capacity,
            pods: HashSet::new(),
            last_heartbeat: now,
            created_at: now,
            swept_healthy: true,
        }
    }

    /// `now - last_heartbeat < timeout`.
    pub fn is_healthy(&self, now: Timestamp, timeout: Duration) -> bool {
        now.saturating_sub(self.last_heartbeat) < duration_millis(timeout)
    }

    /// When the node stopped being healthy, if it has.
    pub fn unhealthy_since(&self, now: Timestamp, timeout: Duration) -> Option<Timestamp> {
        if self.is_healthy(now, timeout) {
            None
        } else {
            Some(self.last_heartbeat.saturating_add(duration_millis(timeout)))
        }
    }
}

/// A running pod.
#[derive(Debug, Clone)]
pub struct Pod {
    pub id: PodId,
    pub cpu_request: u32,
    /// Last usage reported by the hosting node.
    pub cpu_usage: f64,
    pub node_id: NodeId,
    /// Last per-pod health flag reported by the hosting node.
    pub reported_healthy: bool,
    /// Creation order, carried through the pending queue.
    pub(crate) seq: u64,
}

/// A pod waiting for capacity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingPod {
    pub pod_id: PodId,
    pub cpu_request: u32,
    /// Node the pod was evicted from; `None` if it never ran.
    pub origin_node_id: Option<NodeId>,
    pub waiting_since: Timestamp,
    #[serde(skip)]
    pub(crate) seq: u64,
}

// ── Heartbeats ────────────────────────────────────────────────────

/// Periodic liveness and usage report from a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatReport {
    pub node_id: NodeId,
    /// Observed CPU usage per pod.
    #[serde(default)]
    pub usage: HashMap<PodId, f64>,
    /// Per-pod health as seen by the node agent.
    #[serde(default)]
    pub pod_health: HashMap<PodId, bool>,
    /// When the report was taken. Defaults to the receiver's clock.
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

impl HeartbeatReport {
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Default::default()
        }
    }

    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_usage(mut self, pod_id: impl Into<PodId>, cpu_usage: f64) -> Self {
        self.usage.insert(pod_id.into(), cpu_usage);
        self
    }

    pub fn with_pod_health(mut self, pod_id: impl Into<PodId>, healthy: bool) -> Self {
        self.pod_health.insert(pod_id.into(), healthy);
        self
    }
}

/// How a heartbeat was handled. Never an error for the reporter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum HeartbeatAck {
    Accepted { updated_pods: usize },
    /// Older than the stored heartbeat; dropped.
    Stale { last_heartbeat: Timestamp },
    /// Too far ahead of the state clock; dropped.
    FromFuture { timestamp: Timestamp, now: Timestamp },
    /// Node is not registered; dropped.
    UnknownNode,
}

impl HeartbeatAck {
    pub fn is_accepted(&self) -> bool {
        matches!(self, HeartbeatAck::Accepted { .. })
    }
}

// ── Operation reports ─────────────────────────────────────────────

/// A pod as seen by the agent of its hosting node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodAssignment {
    pub pod_id: PodId,
    pub cpu_request: u32,
}

/// Where a launched pod ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PodPlacement {
    Running { node_id: NodeId },
    Pending,
}

impl PodPlacement {
    pub fn node_id(&self) -> Option<&str> {
        match self {
            PodPlacement::Running { node_id } => Some(node_id),
            PodPlacement::Pending => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchOutcome {
    pub pod_id: PodId,
    pub placement: PodPlacement,
}

/// A pod (re)bound to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodMove {
    pub pod_id: PodId,
    pub cpu_request: u32,
    pub node_id: NodeId,
}

/// Result of one pass over the pending queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Pods placed, in queue order.
    pub placed: Vec<PodMove>,
    pub still_pending: usize,
}

impl ReconcileReport {
    pub fn placed_count(&self) -> usize {
        self.placed.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddNodeOutcome {
    pub node_id: NodeId,
    pub capacity: u32,
    pub reconciled: ReconcileReport,
}

/// Result of removing a node and evacuating its pods.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    pub node_id: NodeId,
    pub rescheduled: Vec<PodMove>,
    /// Pods moved to the pending queue, in evacuation order.
    pub pending: Vec<PodId>,
}

impl RemovalReport {
    pub fn rescheduled_count(&self) -> usize {
        self.rescheduled.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

// ── Health sweep ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthTransition {
    pub node_id: NodeId,
    pub healthy: bool,
    pub last_heartbeat: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnhealthyNode {
    pub node_id: NodeId,
    pub unhealthy_for: Duration,
    pub pod_count: usize,
}

/// Outcome of one liveness sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthSweep {
    pub at: Timestamp,
    pub transitions: Vec<HealthTransition>,
    /// Every node currently unhealthy, in creation order.
    pub unhealthy: Vec<UnhealthyNode>,
}

// ── Read-only views ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub capacity: u32,
    /// Sum of the CPU requests of assigned pods.
    pub allocated: u32,
    pub available: u32,
    pub healthy: bool,
    /// Health recorded by the last sweep.
    pub swept_healthy: bool,
    pub last_heartbeat: Timestamp,
    pub heartbeat_age_secs: f64,
    pub created_at: Timestamp,
    /// Assigned pod ids, in creation order.
    pub pods: Vec<PodId>,
}

impl NodeStatus {
    pub fn pod_count(&self) -> usize {
        self.pods.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PodStatus {
    pub pod_id: PodId,
    pub node_id: NodeId,
    pub cpu_request: u32,
    pub cpu_usage: f64,
    /// Hosting node healthy and pod not reported crashed.
    pub healthy: bool,
}

/// Per-pod entry of the `pod-status` view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PodUsage {
    pub cpu_usage: f64,
    pub healthy: bool,
    pub cpu_request: u32,
}

/// Cluster-wide aggregates.
///
/// Usage, requests and capacity cover healthy pods on healthy nodes only.
/// The pod counts cover everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterTotals {
    pub total_cpu_usage: f64,
    pub total_cpu_requested: u64,
    pub total_capacity: u64,
    pub healthy_nodes: usize,
    pub running_pods: usize,
    pub pending_pods: usize,
}

impl ClusterTotals {
    /// Usage over healthy capacity, in percent. Zero without capacity.
    pub fn utilization_pct(&self) -> f64 {
        if self.total_capacity == 0 {
            0.0
        } else {
            self.total_cpu_usage / self.total_capacity as f64 * 100.0
        }
    }
}

/// Consistent copy of the whole cluster taken under one lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSnapshot {
    pub taken_at: Timestamp,
    pub algorithm: SchedulingAlgorithm,
    /// In creation order.
    pub nodes: Vec<NodeStatus>,
    /// Running pods, in creation order.
    pub pods: Vec<PodStatus>,
    /// In queue order.
    pub pending: Vec<PendingPod>,
    pub totals: ClusterTotals,
    pub utilization_pct: f64,
}

impl ClusterSnapshot {
    /// `{node_id: {pod_id: usage}}`, including nodes without pods.
    pub fn pod_status_by_node(&self) -> BTreeMap<NodeId, BTreeMap<PodId, PodUsage>> {
        let mut by_node: BTreeMap<NodeId, BTreeMap<PodId, PodUsage>> = self
            .nodes
            .iter()
            .map(|n| (n.node_id.clone(), BTreeMap::new()))
            .collect();
        for pod in &self.pods {
            by_node.entry(pod.node_id.clone()).or_default().insert(
                pod.pod_id.clone(),
                PodUsage {
                    cpu_usage: pod.cpu_usage,
                    healthy: pod.healthy,
                    cpu_request: pod.cpu_request,
                },
            );
        }
        by_node
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeStatus> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    pub fn pod(&self, pod_id: &str) -> Option<&PodStatus> {
        self.pods.iter().find(|p| p.pod_id == pod_id)
    }

    pub fn healthy_nodes(&self) -> impl Iterator<Item = &NodeStatus> {
        self.nodes.iter().filter(|n| n.healthy)
    }
}

pub(crate) fn heartbeat_age_secs(now: Timestamp, last: Timestamp) -> f64 {
    millis_to_secs(now.saturating_sub(last))
}
