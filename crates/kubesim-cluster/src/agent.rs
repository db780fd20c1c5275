//! Simulated node agent — the per-node process that reports heartbeats.
//!
//! Each tick the agent reads the pods bound to its node, makes up a usage
//! figure for each one and sends a heartbeat. A pod may crash with a fixed
//! probability per tick; once crashed it is reported unhealthy until it
//! leaves the node.

use std::collections::HashSet;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tracing::{debug, info};

use kubesim_core::{AgentConfig, NodeId, PodId};
use kubesim_state::{ClusterState, HeartbeatReport};

/// How simulated pods consume CPU.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageModel {
    /// Mean share of the request a pod uses.
    pub load_factor: f64,
    /// Never report more than the request.
    pub strict_limits: bool,
    /// Chance per tick that a running pod crashes.
    pub crash_probability: f64,
}

impl UsageModel {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            load_factor: config.load_factor,
            strict_limits: config.strict_limits,
            crash_probability: config.crash_probability,
        }
    }

    /// `cpu_request * load_factor * jitter(0.8..1.2)`.
    pub fn sample<R: Rng>(&self, rng: &mut R, cpu_request: u32) -> f64 {
        let request = f64::from(cpu_request);
        let usage = request * self.load_factor * rng.gen_range(0.8..1.2);
        if self.strict_limits { usage.min(request) } else { usage }
    }

    fn crashes<R: Rng>(&self, rng: &mut R) -> bool {
        self.crash_probability > 0.0 && rng.gen_bool(self.crash_probability.clamp(0.0, 1.0))
    }
}

impl Default for UsageModel {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

pub struct SimulatedAgent {
    node_id: NodeId,
    state: ClusterState,
    interval: Duration,
    model: UsageModel,
    crashed: HashSet<PodId>,
}

impl SimulatedAgent {
    pub fn new(node_id: impl Into<NodeId>, state: ClusterState, interval: Duration, model: UsageModel) -> Self {
        Self {
            node_id: node_id.into(),
            state,
            interval,
            model,
            crashed: HashSet::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Build the next heartbeat, or `None` once the node is gone.
    pub fn report<R: Rng>(&mut self, rng: &mut R) -> Option<HeartbeatReport> {
        let pods = self.state.node_assignments(&self.node_id)?;
        self.crashed.retain(|id| pods.iter().any(|p| &p.pod_id == id));

        let mut report = HeartbeatReport::new(self.node_id.clone());
        for pod in pods {
            if self.crashed.contains(&pod.pod_id) || self.model.crashes(rng) {
                self.crashed.insert(pod.pod_id.clone());
                report.pod_health.insert(pod.pod_id, false);
                continue;
            }
            let usage = self.model.sample(rng, pod.cpu_request);
            report.usage.insert(pod.pod_id.clone(), usage);
            report.pod_health.insert(pod.pod_id, true);
        }
        Some(report)
    }

    /// Send heartbeats every `interval` until shutdown or node removal.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut rng = StdRng::from_entropy();
        info!(node_id = %self.node_id, interval = ?self.interval, "agent started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let Some(report) = self.report(&mut rng) else {
                        info!(node_id = %self.node_id, "node no longer registered, agent exiting");
                        break;
                    };
                    let ack = self.state.heartbeat(&report);
                    debug!(node_id = %self.node_id, pods = report.pod_health.len(), ?ack, "heartbeat sent");
                }
                _ = shutdown.changed() => {
                    debug!(node_id = %self.node_id, "agent shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use kubesim_core::SchedulingAlgorithm;
    use kubesim_state::ManualClock;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn state() -> ClusterState {
        ClusterState::with_clock(
            SchedulingAlgorithm::FirstFit,
            Duration::from_secs(10),
            Arc::new(ManualClock::new(0)),
        )
    }

    #[test]
    fn usage_stays_within_jitter_band() {
        let model = UsageModel {
            load_factor: 1.0,
            strict_limits: false,
            crash_probability: 0.0,
        };
        let mut rng = rng();
        for _ in 0..200 {
            let usage = model.sample(&mut rng, 2);
            assert!((1.6..2.4).contains(&usage), "usage {usage}");
        }
    }

    #[test]
    fn strict_limits_cap_at_request() {
        let model = UsageModel {
            load_factor: 1.5,
            strict_limits: true,
            crash_probability: 0.0,
        };
        let mut rng = rng();
        for _ in 0..200 {
            assert!(model.sample(&mut rng, 3) <= 3.0);
        }
    }

    #[test]
    fn report_covers_assigned_pods() {
        let state = state();
        let node = state.add_node(4).unwrap().node_id;
        state.launch_pod(Some("a"), 1).unwrap();
        state.launch_pod(Some("b"), 2).unwrap();
        let mut agent = SimulatedAgent::new(&node, state.clone(), Duration::from_secs(5), UsageModel::default());

        let report = agent.report(&mut rng()).unwrap();

        assert_eq!(report.node_id, node);
        assert_eq!(report.usage.len(), 2);
        assert!(report.pod_health.values().all(|&h| h));
        assert!(state.heartbeat(&report).is_accepted());
    }

    #[test]
    fn crashed_pod_stays_crashed() {
        let state = state();
        let node = state.add_node(4).unwrap().node_id;
        state.launch_pod(Some("a"), 1).unwrap();
        let model = UsageModel {
            crash_probability: 1.0,
            ..UsageModel::default()
        };
        let mut agent = SimulatedAgent::new(&node, state.clone(), Duration::from_secs(5), model);
        let mut rng = rng();

        let report = agent.report(&mut rng).unwrap();
        assert_eq!(report.pod_health.get("a"), Some(&false));
        assert!(report.usage.is_empty());

        agent.model.crash_probability = 0.0;
        let report = agent.report(&mut rng).unwrap();
        assert_eq!(report.pod_health.get("a"), Some(&false));

        // Once the pod is gone the crash is forgotten.
        state.delete_pod(&node, "a").unwrap();
        assert!(agent.report(&mut rng).unwrap().pod_health.is_empty());
        assert!(agent.crashed.is_empty());
    }

    #[test]
    fn report_stops_when_node_removed() {
        let state = state();
        let node = state.add_node(4).unwrap().node_id;
        let mut agent = SimulatedAgent::new(&node, state.clone(), Duration::from_secs(5), UsageModel::default());
        state.remove_node(&node).unwrap();
        assert!(agent.report(&mut rng()).is_none());
    }

    #[tokio::test]
    async fn run_exits_when_node_removed() {
        let state = state();
        let node = state.add_node(4).unwrap().node_id;
        let agent = SimulatedAgent::new(&node, state.clone(), Duration::from_millis(5), UsageModel::default());
        let (_tx, rx) = watch::channel(false);
        state.remove_node(&node).unwrap();

        tokio::time::timeout(Duration::from_secs(1), agent.run(rx))
            .await
            .expect("agent did not exit");
    }
}
