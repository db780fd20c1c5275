//! Health monitor — periodic liveness sweep over every node.
//!
//! Each tick recomputes node health from heartbeat recency, records it in
//! the cluster state and reports transitions. Unhealthy nodes stay in
//! place; only the opt-in [`EvictionPolicy`] removes them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use kubesim_core::{HealthConfig, NodeId, Timestamp};
use kubesim_state::{ClusterError, ClusterState, RemovalReport};

use crate::policy::EvictionPolicy;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Callback invoked for every health event.
pub type HealthCallback = Arc<dyn Fn(HealthEvent) -> BoxFuture<()> + Send + Sync>;

/// Removes a node that is still unhealthy for at least the given window,
/// returning `None` when it recovered in the meantime. Defaults to
/// [`ClusterState::remove_node_if_unhealthy_for`]; the daemon routes it
/// through the node controller so the node's agent is torn down too.
pub type EvictFn =
    Arc<dyn Fn(NodeId, Duration) -> BoxFuture<anyhow::Result<Option<RemovalReport>>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    Unhealthy {
        node_id: NodeId,
        last_heartbeat: Timestamp,
    },
    Recovered {
        node_id: NodeId,
        last_heartbeat: Timestamp,
    },
    Evicted(RemovalReport),
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub events: Vec<HealthEvent>,
    pub unhealthy_nodes: usize,
}

impl SweepReport {
    pub fn evicted(&self) -> impl Iterator<Item = &RemovalReport> {
        self.events.iter().filter_map(|e| match e {
            HealthEvent::Evicted(report) => Some(report),
            _ => None,
        })
    }
}

pub struct HealthMonitor {
    state: ClusterState,
    interval: Duration,
    eviction: EvictionPolicy,
    on_event: Option<HealthCallback>,
    evict_fn: Option<EvictFn>,
}

impl HealthMonitor {
    pub fn new(state: ClusterState, interval: Duration) -> Self {
        Self {
            state,
            interval,
            eviction: EvictionPolicy::disabled(),
            on_event: None,
            evict_fn: None,
        }
    }

    pub fn from_config(state: ClusterState, config: &HealthConfig) -> Self {
        Self::new(state, config.sweep_interval()).with_eviction(EvictionPolicy::from_window(config.evict_after()))
    }

    pub fn with_eviction(mut self, policy: EvictionPolicy) -> Self {
        self.eviction = policy;
        self
    }

    pub fn with_callback(mut self, callback: HealthCallback) -> Self {
        self.on_event = Some(callback);
        self
    }

    pub fn with_evict_fn(mut self, evict_fn: EvictFn) -> Self {
        self.evict_fn = Some(evict_fn);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one sweep: record health, report transitions, evict if due.
    pub async fn sweep_once(&self) -> SweepReport {
        let sweep = self.state.sweep_health();
        let mut report = SweepReport {
            unhealthy_nodes: sweep.unhealthy.len(),
            ..Default::default()
        };

        for t in &sweep.transitions {
            let event = if t.healthy {
                info!(node_id = %t.node_id, last_heartbeat = t.last_heartbeat, "node recovered");
                HealthEvent::Recovered {
                    node_id: t.node_id.clone(),
                    last_heartbeat: t.last_heartbeat,
                }
            } else {
                warn!(node_id = %t.node_id, last_heartbeat = t.last_heartbeat, "node unhealthy: heartbeat timed out");
                HealthEvent::Unhealthy {
                    node_id: t.node_id.clone(),
                    last_heartbeat: t.last_heartbeat,
                }
            };
            self.emit(&mut report, event).await;
        }

        let window = self.eviction.window().unwrap_or_default();
        for node_id in self.eviction.due(&sweep) {
            match self.evict(node_id.clone(), window).await {
                Ok(None) => debug!(%node_id, "node reported again before eviction"),
                Ok(Some(removal)) => {
                    warn!(
                        %node_id,
                        rescheduled = removal.rescheduled_count(),
                        pending = removal.pending_count(),
                        "evicted dead node"
                    );
                    self.emit(&mut report, HealthEvent::Evicted(removal)).await;
                }
                Err(e) if is_already_removed(&e) => {
                    debug!(%node_id, "dead node already removed");
                }
                Err(e) => error!(%node_id, error = %e, "failed to evict dead node"),
            }
        }

        debug!(
            at = sweep.at,
            unhealthy = report.unhealthy_nodes,
            events = report.events.len(),
            "health sweep complete"
        );
        report
    }

    async fn evict(&self, node_id: NodeId, window: Duration) -> anyhow::Result<Option<RemovalReport>> {
        match &self.evict_fn {
            Some(evict) => evict(node_id, window).await,
            None => Ok(self.state.remove_node_if_unhealthy_for(&node_id, window)?),
        }
    }

    async fn emit(&self, report: &mut SweepReport, event: HealthEvent) {
        if let Some(cb) = &self.on_event {
            cb(event.clone()).await;
        }
        report.events.push(event);
    }

    /// Sweep every `interval` until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs_f64(),
            evict_after = ?self.eviction.window(),
            "health monitor started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.sweep_once().await;
                }
                _ = shutdown.changed() => {
                    debug!("health monitor shutting down");
                    break;
                }
            }
        }

        info!("health monitor stopped");
    }
}

fn is_already_removed(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<ClusterError>(),
        Some(ClusterError::NodeNotFound(_))
    )
}
