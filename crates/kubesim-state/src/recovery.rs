//! Evacuation of a removed node's pods.
//!
//! Pods are re-placed one by one in creation order against the remaining
//! healthy nodes. Each placement is recorded before the next pod is tried,
//! so a batch never overcommits a target. Pods that fit nowhere go to the
//! back of the pending queue with the removed node as their origin.

use std::time::Duration;

use kubesim_core::Timestamp;
use kubesim_placement::Scheduler;

use crate::registry::Registry;
use crate::types::{Node, PendingPod, RemovalReport};

/// `node` must already be detached from `reg.nodes`.
pub(crate) fn evacuate(
    reg: &mut Registry,
    scheduler: &Scheduler,
    node: &Node,
    now: Timestamp,
    timeout: Duration,
) -> RemovalReport {
    let mut evicted: Vec<_> = node
        .pods
        .iter()
        .filter_map(|id| reg.pods.remove(id))
        .collect();
    evicted.sort_by_key(|p| p.seq);

    let mut report = RemovalReport {
        node_id: node.id.clone(),
        ..Default::default()
    };
    let mut candidates = reg.candidates(now, timeout);

    for pod in evicted {
        match reg.try_place(scheduler, &mut candidates, &pod.id, pod.cpu_request, pod.seq) {
            Some(moved) => report.rescheduled.push(moved),
            None => {
                report.pending.push(pod.id.clone());
                reg.enqueue(PendingPod {
                    pod_id: pod.id,
                    cpu_request: pod.cpu_request,
                    origin_node_id: Some(node.id.clone()),
                    waiting_since: now,
                    seq: pod.seq,
                });
            }
        }
    }

    report
}
