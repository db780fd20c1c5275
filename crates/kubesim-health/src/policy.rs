//! Dead-node eviction policy.
//!
//! Health transitions alone never move pods. When an eviction window is
//! configured, a node that has stayed unhealthy for at least that long is
//! removed through the regular node-removal path.

use std::time::Duration;

use kubesim_core::NodeId;
use kubesim_state::HealthSweep;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionPolicy {
    evict_after: Option<Duration>,
}

impl EvictionPolicy {
    /// Never evict.
    pub fn disabled() -> Self {
        Self { evict_after: None }
    }

    /// Evict nodes unhealthy for at least `window`.
    pub fn after(window: Duration) -> Self {
        Self {
            evict_after: Some(window),
        }
    }

    pub fn from_window(window: Option<Duration>) -> Self {
        Self {
            evict_after: window,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.evict_after.is_some()
    }

    pub fn window(&self) -> Option<Duration> {
        self.evict_after
    }

    /// Nodes in `sweep` due for eviction, in creation order.
    pub fn due<'a>(&self, sweep: &'a HealthSweep) -> Vec<&'a NodeId> {
        let Some(window) = self.evict_after else {
            return Vec::new();
        };
        sweep
            .unhealthy
            .iter()
            .filter(|n| n.unhealthy_for >= window)
            .map(|n| &n.node_id)
            .collect()
    }
}
