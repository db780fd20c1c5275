//! ClusterState — the authoritative node/pod registry.
//!
//! Every public operation runs as one critical section over the shared
//! [`Registry`]: validation happens first, then the whole mutation is
//! applied before the lock is released, so no caller ever observes a
//! half-moved pod. Logging happens after the lock is dropped.
//!
//! `ClusterState` is `Clone` + `Send` + `Sync` (backed by `Arc`) and is
//! shared between request handlers, the health sweep and the autoscaler.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use kubesim_core::{KubesimConfig, NodeId, SchedulingAlgorithm, Timestamp};
use kubesim_placement::Scheduler;

use crate::clock::{Clock, SystemClock, duration_millis};
use crate::error::{ClusterError, ClusterResult};
use crate::reconcile::reconcile;
use crate::recovery::evacuate;
use crate::registry::Registry;
use crate::types::*;

/// Longest pod id a caller may supply.
pub const MAX_POD_ID_LEN: usize = 63;

/// How far ahead of the state clock a reported timestamp may be.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct ClusterState {
    inner: Arc<Shared>,
}

struct Shared {
    registry: Mutex<Registry>,
    scheduler: Scheduler,
    heartbeat_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterState")
            .field("algorithm", &self.algorithm())
            .field("heartbeat_timeout", &self.inner.heartbeat_timeout)
            .field("clock", &self.inner.clock)
            .finish_non_exhaustive()
    }
}

impl ClusterState {
    pub fn new(algorithm: SchedulingAlgorithm, heartbeat_timeout: Duration) -> Self {
        Self::with_clock(algorithm, heartbeat_timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(
        algorithm: SchedulingAlgorithm,
        heartbeat_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                scheduler: Scheduler::new(algorithm),
                heartbeat_timeout,
                clock,
            }),
        }
    }

    pub fn from_config(config: &KubesimConfig) -> Self {
        Self::new(config.scheduler.algorithm, config.health.heartbeat_timeout())
    }

    pub fn algorithm(&self) -> SchedulingAlgorithm {
        self.inner.scheduler.algorithm()
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.inner.heartbeat_timeout
    }

    pub fn now(&self) -> Timestamp {
        self.inner.clock.now()
    }

    // A poisoned lock still guards a consistent registry.
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Register a node and retry the pending queue against it.
    pub fn add_node(&self, capacity: i64) -> ClusterResult<AddNodeOutcome> {
        let capacity = u32::try_from(capacity)
            .ok()
            .filter(|&c| c > 0)
            .ok_or(ClusterError::InvalidCapacity(capacity))?;

        let (node_id, reconciled) = {
            let mut reg = self.lock();
            let now = self.now();
            let node_id = reg.next_node_id();
            reg.nodes.push(Node::new(node_id.clone(), capacity, now));
            let reconciled = reconcile(&mut reg, &self.inner.scheduler, now, self.heartbeat_timeout());
            (node_id, reconciled)
        };

        info!(
            %node_id,
            capacity,
            placed_from_pending = reconciled.placed_count(),
            "node added"
        );
        log_reconciled(&reconciled);
        Ok(AddNodeOutcome {
            node_id,
            capacity,
            reconciled,
        })
    }

    /// Remove a node, evacuating its pods onto the remaining healthy nodes.
    ///
    /// Pods that fit nowhere are queued, never dropped.
    pub fn remove_node(&self, node_id: &str) -> ClusterResult<RemovalReport> {
        let report = {
            let mut reg = self.lock();
            let node = reg
                .take_node(node_id)
                .ok_or_else(|| ClusterError::NodeNotFound(node_id.to_string()))?;
            let now = self.now();
            evacuate(&mut reg, &self.inner.scheduler, &node, now, self.heartbeat_timeout())
        };

        log_removal(&report);
        Ok(report)
    }

    /// Remove a node only if it has been unhealthy for at least `window`
    /// at the moment of removal. `None` when the node is still in grace
    /// or has reported again since it was seen dead.
    pub fn remove_node_if_unhealthy_for(&self, node_id: &str, window: Duration) -> ClusterResult<Option<RemovalReport>> {
        let timeout = self.heartbeat_timeout();
        let report = {
            let mut reg = self.lock();
            let now = self.now();
            let node = reg
                .node(node_id)
                .ok_or_else(|| ClusterError::NodeNotFound(node_id.to_string()))?;
            let due = node
                .unhealthy_since(now, timeout)
                .is_some_and(|since| now.saturating_sub(since) >= duration_millis(window));
            if !due {
                None
            } else {
                reg.take_node(node_id)
                    .map(|node| evacuate(&mut reg, &self.inner.scheduler, &node, now, timeout))
            }
        };

        match &report {
            Some(report) => log_removal(report),
            None => debug!(node_id, "node no longer due for removal"),
        }
        Ok(report)
    }

    // ── Pods ───────────────────────────────────────────────────────

    /// Place a pod, or queue it when no healthy node has room.
    ///
    /// `pod_id` is generated as `pod_<n>` when omitted.
    pub fn launch_pod(&self, pod_id: Option<&str>, cpu_request: i64) -> ClusterResult<LaunchOutcome> {
        let cpu_request = u32::try_from(cpu_request)
            .ok()
            .filter(|&c| c > 0)
            .ok_or(ClusterError::InvalidCpuRequest(cpu_request))?;
        if let Some(id) = pod_id {
            validate_pod_id(id)?;
        }

        let outcome = {
            let mut reg = self.lock();
            let pod_id = match pod_id {
                Some(id) if reg.contains_pod(id) => {
                    return Err(ClusterError::DuplicatePod(id.to_string()));
                }
                Some(id) => id.to_string(),
                None => reg.generate_pod_id(),
            };
            let now = self.now();
            let seq = reg.next_seq();
            let mut candidates = reg.candidates(now, self.heartbeat_timeout());

            let placement = match reg.try_place(
                &self.inner.scheduler,
                &mut candidates,
                &pod_id,
                cpu_request,
                seq,
            ) {
                Some(moved) => PodPlacement::Running {
                    node_id: moved.node_id,
                },
                None => {
                    reg.enqueue(PendingPod {
                        pod_id: pod_id.clone(),
                        cpu_request,
                        origin_node_id: None,
                        waiting_since: now,
                        seq,
                    });
                    PodPlacement::Pending
                }
            };
            LaunchOutcome { pod_id, placement }
        };

        match &outcome.placement {
            PodPlacement::Running { node_id } => {
                info!(pod_id = %outcome.pod_id, cpu_request, %node_id, "pod placed");
            }
            PodPlacement::Pending => {
                warn!(pod_id = %outcome.pod_id, cpu_request, "no capacity, pod queued");
            }
        }
        Ok(outcome)
    }

    /// Delete a running pod and retry the pending queue.
    pub fn delete_pod(&self, node_id: &str, pod_id: &str) -> ClusterResult<ReconcileReport> {
        let reconciled = {
            let mut reg = self.lock();
            let node = reg
                .node(node_id)
                .ok_or_else(|| ClusterError::NodeNotFound(node_id.to_string()))?;
            if !node.pods.contains(pod_id) {
                return Err(ClusterError::PodNotFound {
                    node_id: node_id.to_string(),
                    pod_id: pod_id.to_string(),
                });
            }
            reg.unbind(pod_id);
            let now = self.now();
            reconcile(&mut reg, &self.inner.scheduler, now, self.heartbeat_timeout())
        };

        info!(node_id, pod_id, "pod deleted");
        log_reconciled(&reconciled);
        Ok(reconciled)
    }

    /// Drop a pod from the pending queue.
    pub fn delete_pending_pod(&self, pod_id: &str) -> ClusterResult<PendingPod> {
        let removed = {
            let mut reg = self.lock();
            let idx = reg
                .pending
                .iter()
                .position(|p| p.pod_id == pod_id)
                .ok_or_else(|| ClusterError::PendingPodNotFound(pod_id.to_string()))?;
            reg.pending.remove(idx)
        };
        let removed = removed.ok_or_else(|| ClusterError::PendingPodNotFound(pod_id.to_string()))?;
        info!(pod_id, "pending pod deleted");
        Ok(removed)
    }

    /// Retry the pending queue once, in FIFO order.
    pub fn reconcile_pending(&self) -> ReconcileReport {
        let reconciled = {
            let mut reg = self.lock();
            let now = self.now();
            reconcile(&mut reg, &self.inner.scheduler, now, self.heartbeat_timeout())
        };
        log_reconciled(&reconciled);
        reconciled
    }

    // ── Heartbeats and health ──────────────────────────────────────

    /// Record a heartbeat. Unknown nodes and stale reports are dropped.
    ///
    /// Usage and health entries for pods the node does not host are
    /// ignored, as are negative or non-finite usage values.
    pub fn heartbeat(&self, report: &HeartbeatReport) -> HeartbeatAck {
        let (at, ack) = {
            let mut guard = self.lock();
            let reg = &mut *guard;
            let now = self.now();
            let at = report.timestamp.unwrap_or(now);
            let ack = match reg.nodes.iter_mut().find(|n| n.id == report.node_id) {
                None => HeartbeatAck::UnknownNode,
                Some(_) if at > now.saturating_add(duration_millis(MAX_CLOCK_SKEW)) => {
                    HeartbeatAck::FromFuture { timestamp: at, now }
                }
                Some(node) if at < node.last_heartbeat => HeartbeatAck::Stale {
                    last_heartbeat: node.last_heartbeat,
                },
                Some(node) => {
                    node.last_heartbeat = at;
                    let mut updated_pods = 0;
                    for (pod_id, &usage) in &report.usage {
                        if !usage.is_finite() || usage < 0.0 {
                            continue;
                        }
                        if let Some(pod) = reg.pods.get_mut(pod_id).filter(|p| p.node_id == node.id) {
                            pod.cpu_usage = usage;
                            updated_pods += 1;
                        }
                    }
                    for (pod_id, &healthy) in &report.pod_health {
                        if let Some(pod) = reg.pods.get_mut(pod_id).filter(|p| p.node_id == node.id) {
                            pod.reported_healthy = healthy;
                        }
                    }
                    HeartbeatAck::Accepted { updated_pods }
                }
            };
            (at, ack)
        };

        let node_id = &report.node_id;
        match &ack {
            HeartbeatAck::Accepted { updated_pods } => {
                debug!(%node_id, at, updated_pods, "heartbeat accepted");
            }
            HeartbeatAck::Stale { last_heartbeat } => {
                warn!(%node_id, at, last_heartbeat, "stale heartbeat dropped");
            }
            HeartbeatAck::FromFuture { now, .. } => {
                warn!(%node_id, at, now, "heartbeat from the future dropped");
            }
            HeartbeatAck::UnknownNode => {
                warn!(%node_id, "heartbeat from unknown node dropped");
            }
        }
        ack
    }

    /// Recompute every node's health and record it.
    ///
    /// Placements are untouched: unhealthy nodes keep their pods.
    pub fn sweep_health(&self) -> HealthSweep {
        let timeout = self.heartbeat_timeout();
        let mut reg = self.lock();
        let now = self.now();
        let mut sweep = HealthSweep {
            at: now,
            ..Default::default()
        };

        for node in reg.nodes.iter_mut() {
            let healthy = node.is_healthy(now, timeout);
            if healthy != node.swept_healthy {
                node.swept_healthy = healthy;
                sweep.transitions.push(HealthTransition {
                    node_id: node.id.clone(),
                    healthy,
                    last_heartbeat: node.last_heartbeat,
                });
            }
            if let Some(since) = node.unhealthy_since(now, timeout) {
                sweep.unhealthy.push(UnhealthyNode {
                    node_id: node.id.clone(),
                    unhealthy_for: Duration::from_millis(now.saturating_sub(since)),
                    pod_count: node.pods.len(),
                });
            }
        }
        sweep
    }

    // ── Read-only views ────────────────────────────────────────────

    /// Consistent copy of nodes, pods, pending queue and totals.
    pub fn snapshot(&self) -> ClusterSnapshot {
        let reg = self.lock();
        let now = self.now();
        let timeout = self.heartbeat_timeout();

        let nodes: Vec<NodeStatus> = reg.nodes.iter().map(|n| node_status(&reg, n, now, timeout)).collect();
        let mut totals = ClusterTotals {
            running_pods: reg.pods.len(),
            pending_pods: reg.pending.len(),
            ..Default::default()
        };
        let mut pods = Vec::with_capacity(reg.pods.len());

        for node in &reg.nodes {
            let node_healthy = node.is_healthy(now, timeout);
            if node_healthy {
                totals.healthy_nodes += 1;
                totals.total_capacity += u64::from(node.capacity);
            }
            for pod in reg.pods_on(node) {
                let healthy = node_healthy && pod.reported_healthy;
                if healthy {
                    totals.total_cpu_usage += pod.cpu_usage;
                    totals.total_cpu_requested += u64::from(pod.cpu_request);
                }
                pods.push((
                    pod.seq,
                    PodStatus {
                        pod_id: pod.id.clone(),
                        node_id: pod.node_id.clone(),
                        cpu_request: pod.cpu_request,
                        cpu_usage: pod.cpu_usage,
                        healthy,
                    },
                ));
            }
        }
        pods.sort_by_key(|(seq, _)| *seq);

        let utilization_pct = totals.utilization_pct();
        ClusterSnapshot {
            taken_at: now,
            algorithm: self.algorithm(),
            nodes,
            pods: pods.into_iter().map(|(_, p)| p).collect(),
            pending: reg.pending.iter().cloned().collect(),
            totals,
            utilization_pct,
        }
    }

    /// Nodes in creation order.
    pub fn list_nodes(&self) -> Vec<NodeStatus> {
        let reg = self.lock();
        let now = self.now();
        reg.nodes
            .iter()
            .map(|n| node_status(&reg, n, now, self.heartbeat_timeout()))
            .collect()
    }

    pub fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
        let reg = self.lock();
        let now = self.now();
        reg.node(node_id)
            .map(|n| node_status(&reg, n, now, self.heartbeat_timeout()))
    }

    /// The pending queue, in FIFO order.
    pub fn pending_pods(&self) -> Vec<PendingPod> {
        self.lock().pending.iter().cloned().collect()
    }

    /// Pods currently bound to `node_id`, or `None` for an unknown node.
    pub fn node_assignments(&self, node_id: &str) -> Option<Vec<PodAssignment>> {
        let reg = self.lock();
        let node = reg.node(node_id)?;
        Some(
            reg.pods_on(node)
                .into_iter()
                .map(|p| PodAssignment {
                    pod_id: p.id.clone(),
                    cpu_request: p.cpu_request,
                })
                .collect(),
        )
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.lock().nodes.iter().map(|n| n.id.clone()).collect()
    }

    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    /// Running plus pending.
    pub fn pod_count(&self) -> usize {
        let reg = self.lock();
        reg.pods.len() + reg.pending.len()
    }

    /// Every consistency violation found in the current state.
    ///
    /// Checks that each pod is in exactly one place, that no node is
    /// overcommitted and that the pending queue is ordered by arrival.
    pub fn audit(&self) -> Vec<String> {
        let reg = self.lock();
        let mut violations = Vec::new();

        for pod in reg.pods.values() {
            match reg.node(&pod.node_id) {
                None => violations.push(format!("pod {} bound to missing node {}", pod.id, pod.node_id)),
                Some(node) if !node.pods.contains(&pod.id) => {
                    violations.push(format!("pod {} not listed on node {}", pod.id, pod.node_id))
                }
                Some(_) => {}
            }
            if reg.pending.iter().any(|p| p.pod_id == pod.id) {
                violations.push(format!("pod {} is both running and pending", pod.id));
            }
        }

        for node in &reg.nodes {
            for pod_id in &node.pods {
                match reg.pods.get(pod_id) {
                    None => violations.push(format!("node {} lists unknown pod {pod_id}", node.id)),
                    Some(pod) if pod.node_id != node.id => violations.push(format!(
                        "node {} lists pod {pod_id} bound to {}",
                        node.id, pod.node_id
                    )),
                    Some(_) => {}
                }
            }
            let allocated = reg.allocated(node);
            if allocated > node.capacity {
                violations.push(format!(
                    "node {} overcommitted: {allocated} > {}",
                    node.id, node.capacity
                ));
            }
        }

        for (i, entry) in reg.pending.iter().enumerate() {
            if reg.pending.iter().skip(i + 1).any(|p| p.pod_id == entry.pod_id) {
                violations.push(format!("pod {} queued twice", entry.pod_id));
            }
        }
        for pair in reg.pending.iter().collect::<Vec<_>>().windows(2) {
            if pair[1].waiting_since < pair[0].waiting_since {
                violations.push(format!(
                    "pending queue out of order at {} (waiting since {} < {})",
                    pair[1].pod_id, pair[1].waiting_since, pair[0].waiting_since
                ));
            }
        }

        violations
    }
}

fn node_status(reg: &Registry, node: &Node, now: Timestamp, timeout: Duration) -> NodeStatus {
    let allocated = reg.allocated(node);
    NodeStatus {
        node_id: node.id.clone(),
        capacity: node.capacity,
        allocated,
        available: node.capacity.saturating_sub(allocated),
        healthy: node.is_healthy(now, timeout),
        swept_healthy: node.swept_healthy,
        last_heartbeat: node.last_heartbeat,
        heartbeat_age_secs: heartbeat_age_secs(now, node.last_heartbeat),
        created_at: node.created_at,
        pods: reg.pods_on(node).into_iter().map(|p| p.id.clone()).collect(),
    }
}

fn validate_pod_id(pod_id: &str) -> ClusterResult<()> {
    let reason = if pod_id.is_empty() {
        "must not be empty"
    } else if pod_id.len() > MAX_POD_ID_LEN {
        "longer than 63 characters"
    } else if !pod_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        "only ASCII letters, digits, '_', '.' and '-' are allowed"
    } else {
        return Ok(());
    };
    Err(ClusterError::InvalidPodId {
        pod_id: pod_id.to_string(),
        reason,
    })
}

fn log_removal(report: &RemovalReport) {
    let node_id = &report.node_id;
    info!(
        %node_id,
        rescheduled = report.rescheduled_count(),
        pending = report.pending_count(),
        "node removed"
    );
    for moved in &report.rescheduled {
        debug!(pod_id = %moved.pod_id, from = %node_id, to = %moved.node_id, "pod rescheduled");
    }
    for pod_id in &report.pending {
        warn!(%pod_id, from = %node_id, "no capacity for evicted pod, queued");
    }
}

fn log_reconciled(report: &ReconcileReport) {
    for moved in &report.placed {
        info!(pod_id = %moved.pod_id, node_id = %moved.node_id, "pending pod placed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn state(algorithm: SchedulingAlgorithm) -> (ClusterState, ManualClock) {
        let clock = ManualClock::new(0);
        let state = ClusterState::with_clock(algorithm, TIMEOUT, Arc::new(clock.clone()));
        (state, clock)
    }

    fn running_on(outcome: &LaunchOutcome) -> Option<&str> {
        outcome.placement.node_id()
    }

    fn assert_consistent(state: &ClusterState) {
        assert_eq!(state.audit(), Vec::<String>::new());
    }

    // ── Scenarios ──────────────────────────────────────────────────

    #[test]
    fn first_fit_spills_to_next_node() {
        let (state, _) = state(SchedulingAlgorithm::FirstFit);
        let a = state.add_node(4).unwrap().node_id;
        let b = state.add_node(4).unwrap().node_id;

        let p1 = state.launch_pod(None, 3).unwrap();
        assert_eq!(running_on(&p1), Some(a.as_str()));
        let p2 = state.launch_pod(None, 2).unwrap();
        assert_eq!(running_on(&p2), Some(b.as_str()));

        let nodes = state.list_nodes();
        assert_eq!(nodes[0].available, 1);
        assert_eq!(nodes[1].available, 2);
    }

    #[test]
    fn best_fit_takes_tightest_node() {
        let (state, _) = state(SchedulingAlgorithm::BestFit);
        let a = state.add_node(4).unwrap().node_id;
        state.add_node(4).unwrap();

        let full = state.launch_pod(None, 4).unwrap();
        assert_eq!(running_on(&full), Some(a.as_str()));
        let c = state.add_node(2).unwrap().node_id;

        let pod = state.launch_pod(None, 2).unwrap();
        assert_eq!(running_on(&pod), Some(c.as_str()));
    }

    #[test]
    fn worst_fit_takes_loosest_node() {
        let (state, _) = state(SchedulingAlgorithm::WorstFit);
        let b = state.add_node(4).unwrap().node_id;
        state.add_node(2).unwrap();

        let pod = state.launch_pod(None, 2).unwrap();
        assert_eq!(running_on(&pod), Some(b.as_str()));
    }

    #[test]
    fn removing_only_node_queues_all_pods() {
        let (state, _) = state(SchedulingAlgorithm::FirstFit);
        let a = state.add_node(4).unwrap().node_id;
        state.launch_pod(Some("p1"), 2).unwrap();
        state.launch_pod(Some("p2"), 2).unwrap();

        let report = state.remove_node(&a).unwrap();

        assert_eq!(report.rescheduled_count(), 0);
        assert_eq!(report.pending_count(), 2);
        assert_eq!(state.pod_count(), 2);
        let pending = state.pending_pods();
        assert_eq!(pending[0].pod_id, "p1");
        assert_eq!(pending[1].pod_id, "p2");
        assert!(pending.iter().all(|p| p.origin_node_id.as_deref() == Some(a.as_str())));
        assert_consistent(&state);
    }

    #[test]
    fn new_node_drains_queue_in_fifo_order() {
        let (state, _) = state(SchedulingAlgorithm::FirstFit);
        let a = state.add_node(4).unwrap().node_id;
        state.launch_pod(Some("p1"), 2).unwrap();
        state.launch_pod(Some("p2"), 2).unwrap();
        state.remove_node(&a).unwrap();

        let added = state.add_node(4).unwrap();

        let placed: Vec<_> = added.reconciled.placed.iter().map(|m| m.pod_id.as_str()).collect();
        assert_eq!(placed, ["p1", "p2"]);
        assert!(state.pending_pods().is_empty());
        assert_eq!(state.node_status(&added.node_id).unwrap().pods, ["p1", "p2"]);
        assert_consistent(&state);
    }

    #[test]
    fn heartbeat_restores_health_and_totals() {
        let (state, clock) = state(SchedulingAlgorithm::BestFit);
        let a = state.add_node(4).unwrap().node_id;
        state.launch_pod(Some("p1"), 2).unwrap();
        let ack = state.heartbeat(&HeartbeatReport::new(&a).at(0).with_usage("p1", 1.5));
        assert_eq!(ack, HeartbeatAck::Accepted { updated_pods: 1 });
        assert_eq!(state.snapshot().totals.total_cpu_usage, 1.5);

        clock.set_secs(11);
        let snap = state.snapshot();
        assert!(!snap.nodes[0].healthy);
        assert!(!snap.pods[0].healthy);
        assert_eq!(snap.totals.total_cpu_usage, 0.0);
        assert_eq!(snap.totals.total_cpu_requested, 0);
        assert_eq!(snap.nodes[0].pods, ["p1"]);

        state.heartbeat(&HeartbeatReport::new(&a).at(11_000));
        let snap = state.snapshot();
        assert!(snap.nodes[0].healthy);
        assert!(snap.pods[0].healthy);
        assert_eq!(snap.totals.total_cpu_usage, 1.5);
        assert_eq!(snap.totals.total_cpu_requested, 2);
    }

    // ── Properties ─────────────────────────────────────────────────

    #[test]
    fn removal_conserves_pod_count() {
        let (state, _) = state(SchedulingAlgorithm::WorstFit);
        for cap in [6, 3, 2] {
            state.add_node(cap).unwrap();
        }
        for cpu in [2, 3, 1, 2, 1, 1] {
            state.launch_pod(None, cpu).unwrap();
        }
        let before = state.pod_count();

        for node_id in state.node_ids() {
            let report = state.remove_node(&node_id).unwrap();
            assert_eq!(state.pod_count(), before, "after removing {node_id}: {report:?}");
            assert_consistent(&state);
        }
        assert_eq!(state.pending_pods().len(), before);
    }

    #[test]
    fn capacity_is_never_exceeded() {
        for algorithm in SchedulingAlgorithm::ALL {
            let (state, _) = state(algorithm);
            for cap in [5, 3, 4] {
                state.add_node(cap).unwrap();
            }
            for cpu in [2, 4, 1, 3, 3, 2, 1, 5, 1] {
                state.launch_pod(None, cpu).unwrap();
            }
            let first = state.node_ids()[0].clone();
            state.remove_node(&first).unwrap();
            state.add_node(2).unwrap();

            for node in state.list_nodes() {
                assert!(node.allocated <= node.capacity, "{algorithm}: {node:?}");
            }
            assert_consistent(&state);
        }
    }

    #[test]
    fn earlier_pending_pod_is_placed_first() {
        let (state, clock) = state(SchedulingAlgorithm::FirstFit);
        state.launch_pod(Some("a"), 3).unwrap();
        clock.advance(Duration::from_secs(1));
        state.launch_pod(Some("b"), 3).unwrap();

        // Room for exactly one of them.
        let added = state.add_node(3).unwrap();
        assert_eq!(added.reconciled.placed[0].pod_id, "a");
        assert_eq!(state.pending_pods()[0].pod_id, "b");
    }

    #[test]
    fn deleting_pod_reconciles_queue() {
        let (state, _) = state(SchedulingAlgorithm::FirstFit);
        let node = state.add_node(4).unwrap().node_id;
        state.launch_pod(Some("big"), 4).unwrap();
        let queued = state.launch_pod(Some("next"), 2).unwrap();
        assert_eq!(queued.placement, PodPlacement::Pending);

        let reconciled = state.delete_pod(&node, "big").unwrap();
        assert_eq!(reconciled.placed[0].pod_id, "next");
        assert_eq!(reconciled.still_pending, 0);
        assert_consistent(&state);
    }

    #[test]
    fn unhealthy_node_is_not_a_target_but_keeps_pods() {
        let (state, clock) = state(SchedulingAlgorithm::FirstFit);
        let a = state.add_node(4).unwrap().node_id;
        state.launch_pod(Some("p1"), 1).unwrap();
        clock.set_secs(10);
        let b = state.add_node(4).unwrap().node_id;

        let pod = state.launch_pod(Some("p2"), 1).unwrap();
        assert_eq!(running_on(&pod), Some(b.as_str()));
        assert_eq!(state.node_status(&a).unwrap().pods, ["p1"]);
    }

    // ── Validation ─────────────────────────────────────────────────

    #[test]
    fn invalid_inputs_leave_state_untouched() {
        let (state, _) = state(SchedulingAlgorithm::BestFit);
        assert_eq!(state.add_node(0), Err(ClusterError::InvalidCapacity(0)));
        assert_eq!(state.add_node(-3), Err(ClusterError::InvalidCapacity(-3)));
        assert_eq!(
            state.add_node(i64::from(u32::MAX) + 1),
            Err(ClusterError::InvalidCapacity(i64::from(u32::MAX) + 1))
        );
        assert_eq!(state.launch_pod(None, 0), Err(ClusterError::InvalidCpuRequest(0)));
        assert!(matches!(
            state.launch_pod(Some("bad id"), 1),
            Err(ClusterError::InvalidPodId { .. })
        ));
        assert!(matches!(
            state.launch_pod(Some(""), 1),
            Err(ClusterError::InvalidPodId { .. })
        ));
        let long = "x".repeat(MAX_POD_ID_LEN + 1);
        assert!(state.launch_pod(Some(&long), 1).unwrap_err().is_validation());

        assert_eq!(state.node_count(), 0);
        assert_eq!(state.pod_count(), 0);
    }

    #[test]
    fn duplicate_pod_ids_are_rejected_running_or_pending() {
        let (state, _) = state(SchedulingAlgorithm::BestFit);
        state.launch_pod(Some("web-1"), 1).unwrap();
        assert_eq!(
            state.launch_pod(Some("web-1"), 1),
            Err(ClusterError::DuplicatePod("web-1".into()))
        );
        state.add_node(4).unwrap();
        state.launch_pod(Some("web-2"), 1).unwrap();
        assert_eq!(
            state.launch_pod(Some("web-2"), 1),
            Err(ClusterError::DuplicatePod("web-2".into()))
        );
    }

    #[test]
    fn generated_ids_avoid_supplied_ones() {
        let (state, _) = state(SchedulingAlgorithm::BestFit);
        state.add_node(8).unwrap();
        state.launch_pod(Some("pod_1"), 1).unwrap();
        assert_eq!(state.launch_pod(None, 1).unwrap().pod_id, "pod_2");
    }

    #[test]
    fn unknown_references_are_not_found() {
        let (state, _) = state(SchedulingAlgorithm::BestFit);
        let node = state.add_node(4).unwrap().node_id;
        assert_eq!(
            state.remove_node("node_99"),
            Err(ClusterError::NodeNotFound("node_99".into()))
        );
        assert_eq!(
            state.delete_pod("node_99", "p"),
            Err(ClusterError::NodeNotFound("node_99".into()))
        );
        assert_eq!(
            state.delete_pod(&node, "p"),
            Err(ClusterError::PodNotFound {
                node_id: node.clone(),
                pod_id: "p".into()
            })
        );
        assert_eq!(
            state.delete_pending_pod("p"),
            Err(ClusterError::PendingPodNotFound("p".into()))
        );
    }

    #[test]
    fn pending_pod_can_be_deleted() {
        let (state, _) = state(SchedulingAlgorithm::BestFit);
        state.launch_pod(Some("a"), 2).unwrap();
        state.launch_pod(Some("b"), 2).unwrap();

        let removed = state.delete_pending_pod("a").unwrap();
        assert_eq!(removed.cpu_request, 2);
        assert_eq!(removed.origin_node_id, None);
        assert_eq!(state.pending_pods().len(), 1);
        assert_eq!(state.pod_count(), 1);
    }

    // ── Heartbeats ─────────────────────────────────────────────────

    #[test]
    fn stale_heartbeat_is_dropped() {
        let (state, _) = state(SchedulingAlgorithm::BestFit);
        let a = state.add_node(4).unwrap().node_id;
        state.launch_pod(Some("p1"), 2).unwrap();
        state.heartbeat(&HeartbeatReport::new(&a).at(5_000).with_usage("p1", 1.0));

        let ack = state.heartbeat(&HeartbeatReport::new(&a).at(4_000).with_usage("p1", 2.0));

        assert_eq!(ack, HeartbeatAck::Stale { last_heartbeat: 5_000 });
        let snap = state.snapshot();
        assert_eq!(snap.nodes[0].last_heartbeat, 5_000);
        assert_eq!(snap.pods[0].cpu_usage, 1.0);
    }

    #[test]
    fn equal_timestamp_is_accepted() {
        let (state, _) = state(SchedulingAlgorithm::BestFit);
        let a = state.add_node(4).unwrap().node_id;
        assert!(state.heartbeat(&HeartbeatReport::new(&a).at(0)).is_accepted());
    }

    #[test]
    fn future_timestamp_is_dropped() {
        let (state, clock) = state(SchedulingAlgorithm::FirstFit);
        let a = state.add_node(4).unwrap().node_id;
        state.launch_pod(Some("p1"), 2).unwrap();

        // Microseconds instead of milliseconds.
        let ack = state.heartbeat(&HeartbeatReport::new(&a).at(1_700_000_000_000_000).with_usage("p1", 1.0));
        assert_eq!(
            ack,
            HeartbeatAck::FromFuture {
                timestamp: 1_700_000_000_000_000,
                now: 0
            }
        );
        assert_eq!(state.snapshot().nodes[0].last_heartbeat, 0);

        clock.set_secs(3600);
        assert!(!state.snapshot().nodes[0].healthy);

        let ack = state.heartbeat(&HeartbeatReport::new(&a).with_usage("p1", 1.5));
        assert!(ack.is_accepted());
        let snap = state.snapshot();
        assert!(snap.nodes[0].healthy);
        assert_eq!(snap.pods[0].cpu_usage, 1.5);
    }

    #[test]
    fn small_clock_skew_is_tolerated() {
        let (state, _) = state(SchedulingAlgorithm::FirstFit);
        let a = state.add_node(4).unwrap().node_id;
        let skew = duration_millis(MAX_CLOCK_SKEW);

        assert!(state.heartbeat(&HeartbeatReport::new(&a).at(skew)).is_accepted());
        assert!(matches!(
            state.heartbeat(&HeartbeatReport::new(&a).at(skew + 1)),
            HeartbeatAck::FromFuture { .. }
        ));
    }

    #[test]
    fn concurrent_unstamped_heartbeats_are_never_stale() {
        let state = ClusterState::new(SchedulingAlgorithm::FirstFit, TIMEOUT);
        let a = state.add_node(4).unwrap().node_id;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = state.clone();
                let a = a.clone();
                std::thread::spawn(move || {
                    (0..200).all(|_| state.heartbeat(&HeartbeatReport::new(&a)).is_accepted())
                })
            })
            .collect();

        for h in handles {
            assert!(h.join().unwrap());
        }
    }

    #[test]
    fn conditional_removal_rechecks_health() {
        let (state, clock) = state(SchedulingAlgorithm::FirstFit);
        let a = state.add_node(4).unwrap().node_id;
        state.launch_pod(Some("p1"), 2).unwrap();
        let window = Duration::from_secs(30);

        // Unhealthy since 10s, for 20s: still in grace.
        clock.set_secs(30);
        assert_eq!(state.remove_node_if_unhealthy_for(&a, window).unwrap(), None);

        // Reported again just before removal.
        clock.set_secs(40);
        state.heartbeat(&HeartbeatReport::new(&a));
        assert_eq!(state.remove_node_if_unhealthy_for(&a, window).unwrap(), None);
        assert_eq!(state.node_count(), 1);

        clock.set_secs(80);
        let report = state.remove_node_if_unhealthy_for(&a, window).unwrap().unwrap();
        assert_eq!(report.pending, vec!["p1".to_string()]);
        assert_eq!(state.node_count(), 0);
        assert_eq!(state.pod_count(), 1);

        assert_eq!(
            state.remove_node_if_unhealthy_for(&a, window),
            Err(ClusterError::NodeNotFound(a))
        );
    }

    #[test]
    fn heartbeat_from_unknown_node_is_dropped() {
        let (state, _) = state(SchedulingAlgorithm::BestFit);
        assert_eq!(
            state.heartbeat(&HeartbeatReport::new("ghost")),
            HeartbeatAck::UnknownNode
        );
    }

    #[test]
    fn heartbeat_ignores_foreign_pods_and_bad_values() {
        let (state, _) = state(SchedulingAlgorithm::FirstFit);
        let a = state.add_node(1).unwrap().node_id;
        let b = state.add_node(1).unwrap().node_id;
        state.launch_pod(Some("on-a"), 1).unwrap();
        state.launch_pod(Some("on-b"), 1).unwrap();

        let ack = state.heartbeat(
            &HeartbeatReport::new(&a)
                .with_usage("on-a", f64::NAN)
                .with_usage("on-b", 0.7)
                .with_usage("missing", 0.1),
        );
        assert_eq!(ack, HeartbeatAck::Accepted { updated_pods: 0 });
        let snap = state.snapshot();
        assert_eq!(snap.pod("on-a").unwrap().cpu_usage, 0.0);
        assert_eq!(snap.pod("on-b").unwrap().cpu_usage, 0.0);
        assert_eq!(snap.pod("on-b").unwrap().node_id, b);
    }

    #[test]
    fn crashed_pod_is_excluded_from_totals() {
        let (state, _) = state(SchedulingAlgorithm::FirstFit);
        let a = state.add_node(4).unwrap().node_id;
        state.launch_pod(Some("ok"), 1).unwrap();
        state.launch_pod(Some("crashed"), 2).unwrap();
        state.heartbeat(
            &HeartbeatReport::new(&a)
                .with_usage("ok", 0.5)
                .with_usage("crashed", 1.0)
                .with_pod_health("crashed", false),
        );

        let snap = state.snapshot();
        assert_eq!(snap.totals.total_cpu_usage, 0.5);
        assert_eq!(snap.totals.total_cpu_requested, 1);
        assert!(!snap.pod("crashed").unwrap().healthy);
        let by_node = snap.pod_status_by_node();
        assert!(!by_node[&a]["crashed"].healthy);
        assert_eq!(by_node[&a]["ok"].cpu_usage, 0.5);
    }

    #[test]
    fn sweep_reports_transitions_once() {
        let (state, clock) = state(SchedulingAlgorithm::BestFit);
        let a = state.add_node(4).unwrap().node_id;
        state.launch_pod(None, 1).unwrap();

        assert!(state.sweep_health().transitions.is_empty());

        clock.set_secs(12);
        let sweep = state.sweep_health();
        assert_eq!(sweep.transitions.len(), 1);
        assert!(!sweep.transitions[0].healthy);
        assert_eq!(sweep.unhealthy[0].unhealthy_for, Duration::from_secs(2));
        assert_eq!(sweep.unhealthy[0].pod_count, 1);
        assert!(!state.node_status(&a).unwrap().swept_healthy);

        assert!(state.sweep_health().transitions.is_empty());

        state.heartbeat(&HeartbeatReport::new(&a));
        let sweep = state.sweep_health();
        assert!(sweep.transitions[0].healthy);
        assert!(sweep.unhealthy.is_empty());
    }

    #[test]
    fn snapshot_utilization_covers_healthy_capacity() {
        let (state, clock) = state(SchedulingAlgorithm::FirstFit);
        let a = state.add_node(4).unwrap().node_id;
        clock.set_secs(8);
        let b = state.add_node(4).unwrap().node_id;
        state.launch_pod(Some("p"), 2).unwrap();
        state.heartbeat(&HeartbeatReport::new(&a).with_usage("p", 2.0));
        clock.set_secs(19);
        state.heartbeat(&HeartbeatReport::new(&b));

        let snap = state.snapshot();
        // a last reported at 8s.
        assert!(!snap.node(&a).unwrap().healthy);
        assert_eq!(snap.totals.total_capacity, 4);
        assert_eq!(snap.totals.healthy_nodes, 1);
        assert_eq!(snap.utilization_pct, 0.0);
        assert_eq!(snap.node(&b).unwrap().heartbeat_age_secs, 0.0);
    }

    #[test]
    fn node_assignments_list_bound_pods() {
        let (state, _) = state(SchedulingAlgorithm::FirstFit);
        let a = state.add_node(4).unwrap().node_id;
        state.launch_pod(Some("x"), 3).unwrap();
        state.launch_pod(Some("y"), 1).unwrap();

        let pods = state.node_assignments(&a).unwrap();
        assert_eq!(
            pods,
            vec![
                PodAssignment { pod_id: "x".into(), cpu_request: 3 },
                PodAssignment { pod_id: "y".into(), cpu_request: 1 },
            ]
        );
        assert!(state.node_assignments("node_9").is_none());
    }

    #[test]
    fn shared_across_threads() {
        let (state, _) = state(SchedulingAlgorithm::BestFit);
        for _ in 0..4 {
            state.add_node(8).unwrap();
        }
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = state.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        state.launch_pod(None, 1).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(state.pod_count(), 80);
        assert_eq!(state.pending_pods().len(), 48);
        assert_consistent(&state);
    }
}
