//! Shared types used across kubesim crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a worker node (`node_<n>`).
pub type NodeId = String;

/// Identifier of a pod, unique across running and pending pods.
pub type PodId = String;

/// Milliseconds since the unix epoch.
pub type Timestamp = u64;

/// Bin-packing heuristic used for every placement decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulingAlgorithm {
    /// Earliest-created node with enough room.
    FirstFit,
    /// Node left with the least room after placement.
    #[default]
    BestFit,
    /// Node left with the most room after placement.
    WorstFit,
}

impl SchedulingAlgorithm {
    pub const ALL: [SchedulingAlgorithm; 3] = [
        SchedulingAlgorithm::FirstFit,
        SchedulingAlgorithm::BestFit,
        SchedulingAlgorithm::WorstFit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulingAlgorithm::FirstFit => "first-fit",
            SchedulingAlgorithm::BestFit => "best-fit",
            SchedulingAlgorithm::WorstFit => "worst-fit",
        }
    }
}

impl fmt::Display for SchedulingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when an algorithm name is not one of the three heuristics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown scheduling algorithm: {0} (expected first-fit, best-fit or worst-fit)")]
pub struct UnknownAlgorithm(pub String);

impl FromStr for SchedulingAlgorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "first-fit" | "firstfit" => Ok(SchedulingAlgorithm::FirstFit),
            "best-fit" | "bestfit" => Ok(SchedulingAlgorithm::BestFit),
            "worst-fit" | "worstfit" => Ok(SchedulingAlgorithm::WorstFit),
            _ => Err(UnknownAlgorithm(s.to_string())),
        }
    }
}
