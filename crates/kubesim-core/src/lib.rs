//! kubesim-core — shared types and configuration for kubesim.
//!
//! Holds what every other crate agrees on: id and timestamp aliases, the
//! [`SchedulingAlgorithm`] selector, and the `kubesim.toml` configuration
//! with its `KUBESIM_*` environment overrides.

pub mod config;
pub mod types;

pub use config::{
    AgentConfig, ApiConfig, AutoscaleConfig, ConfigError, HealthConfig, KubesimConfig,
    SchedulerConfig,
};
pub use types::*;
