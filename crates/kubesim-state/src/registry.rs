//! The mutable aggregate behind the state lock.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use kubesim_core::{NodeId, PodId, Timestamp};
use kubesim_placement::{NodeCandidate, Scheduler};

use crate::types::{Node, PendingPod, Pod, PodMove};

#[derive(Debug, Default)]
pub(crate) struct Registry {
    /// In creation order.
    pub nodes: Vec<Node>,
    pub pods: HashMap<PodId, Pod>,
    /// FIFO by `waiting_since`.
    pub pending: VecDeque<PendingPod>,
    node_counter: u64,
    pod_counter: u64,
    seq: u64,
}

impl Registry {
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == node_id)
    }

    pub fn take_node(&mut self, node_id: &str) -> Option<Node> {
        let idx = self.nodes.iter().position(|n| n.id == node_id)?;
        Some(self.nodes.remove(idx))
    }

    /// Sum of the CPU requests of the pods assigned to `node`.
    pub fn allocated(&self, node: &Node) -> u32 {
        node.pods
            .iter()
            .filter_map(|id| self.pods.get(id))
            .fold(0u32, |acc, pod| acc.saturating_add(pod.cpu_request))
    }

    /// Healthy nodes as placement candidates, in creation order.
    pub fn candidates(&self, now: Timestamp, timeout: Duration) -> Vec<NodeCandidate> {
        self.nodes
            .iter()
            .filter(|n| n.is_healthy(now, timeout))
            .map(|n| NodeCandidate::new(n.id.clone(), n.capacity, self.allocated(n)))
            .collect()
    }

    /// Pods hosted on `node`, in creation order.
    pub fn pods_on(&self, node: &Node) -> Vec<&Pod> {
        let mut pods: Vec<&Pod> = node.pods.iter().filter_map(|id| self.pods.get(id)).collect();
        pods.sort_by_key(|p| p.seq);
        pods
    }

    /// Known as running or pending.
    pub fn contains_pod(&self, pod_id: &str) -> bool {
        self.pods.contains_key(pod_id) || self.pending.iter().any(|p| p.pod_id == pod_id)
    }

    pub fn next_node_id(&mut self) -> NodeId {
        self.node_counter += 1;
        format!("node_{}", self.node_counter)
    }

    /// Next free `pod_<n>`, skipping ids supplied by callers.
    pub fn generate_pod_id(&mut self) -> PodId {
        loop {
            self.pod_counter += 1;
            let id = format!("pod_{}", self.pod_counter);
            if !self.contains_pod(&id) {
                return id;
            }
        }
    }

    pub fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Ask the scheduler for a node and bind the pod there.
    ///
    /// `candidates` is updated in place so later placements in the same
    /// batch see the reduced room.
    pub fn try_place(
        &mut self,
        scheduler: &Scheduler,
        candidates: &mut [NodeCandidate],
        pod_id: &str,
        cpu_request: u32,
        seq: u64,
    ) -> Option<PodMove> {
        let idx = scheduler.select(cpu_request, candidates)?;
        let candidate = &mut candidates[idx];
        candidate.reserve(cpu_request);
        let node_id = candidate.node_id.clone();
        self.bind(pod_id, cpu_request, seq, &node_id);
        Some(PodMove {
            pod_id: pod_id.to_string(),
            cpu_request,
            node_id,
        })
    }

    fn bind(&mut self, pod_id: &str, cpu_request: u32, seq: u64, node_id: &str) {
        if let Some(node) = self.node_mut(node_id) {
            node.pods.insert(pod_id.to_string());
        }
        self.pods.insert(
            pod_id.to_string(),
            Pod {
                id: pod_id.to_string(),
                cpu_request,
                cpu_usage: 0.0,
                node_id: node_id.to_string(),
                reported_healthy: true,
                seq,
            },
        );
    }

    /// Detach a running pod from its node.
    pub fn unbind(&mut self, pod_id: &str) -> Option<Pod> {
        let pod = self.pods.remove(pod_id)?;
        if let Some(node) = self.node_mut(&pod.node_id) {
            node.pods.remove(pod_id);
        }
        Some(pod)
    }

    pub fn enqueue(&mut self, pending: PendingPod) {
        self.pending.push_back(pending);
    }
}
