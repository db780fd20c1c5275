//! kubesim.toml configuration parser.
//!
//! Every field has a default so an empty file (or no file at all) yields
//! a runnable configuration. Environment overrides use the `KUBESIM_`
//! prefix followed by the short key names (`SCHEDULING_ALGO`,
//! `AUTO_SCALE`, ...).

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SchedulingAlgorithm;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "KUBESIM_";

/// Errors raised while applying overrides or validating a configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidOverride {
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KubesimConfig {
    pub scheduler: SchedulerConfig,
    pub health: HealthConfig,
    pub autoscale: AutoscaleConfig,
    pub agent: AgentConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub algorithm: SchedulingAlgorithm,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// A node is healthy while its last heartbeat is younger than this.
    pub heartbeat_timeout_secs: u64,
    /// Period of the liveness sweep.
    pub sweep_interval_secs: u64,
    /// Remove nodes that stay unhealthy this long. Unset disables eviction.
    pub evict_after_secs: Option<u64>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 10,
            sweep_interval_secs: 5,
            evict_after_secs: None,
        }
    }
}

impl HealthConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn evict_after(&self) -> Option<Duration> {
        self.evict_after_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutoscaleConfig {
    pub enabled: bool,
    /// Scale out above this utilization (percent).
    pub high_threshold: f64,
    /// Scale in below this utilization (percent).
    pub low_threshold: f64,
    /// Capacity of nodes created by the autoscaler and by `add-node`
    /// requests that omit `cores`.
    pub default_node_capacity: u32,
    pub interval_secs: u64,
    /// Minimum time between two scaling actions.
    pub cooldown_secs: u64,
    /// Scale out when pods are waiting even if utilization is in band.
    pub scale_on_pending: bool,
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            high_threshold: 80.0,
            low_threshold: 0.0,
            default_node_capacity: 4,
            interval_secs: 15,
            cooldown_secs: 60,
            scale_on_pending: false,
        }
    }
}

impl AutoscaleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Behaviour of the simulated per-node agents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub heartbeat_interval_secs: u64,
    /// Never report usage above a pod's request.
    pub strict_limits: bool,
    /// Average fraction of its request a pod consumes.
    pub load_factor: f64,
    /// Per-tick probability that a pod crashes.
    pub crash_probability: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 5,
            strict_limits: false,
            load_factor: 0.6,
            crash_probability: 0.0,
        }
    }
}

impl AgentConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
        }
    }
}

impl KubesimConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let config: KubesimConfig = toml::from_str(&content)
            .with_context(|| format!("parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `KUBESIM_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(std::env::vars())
    }

    /// Apply overrides from `(key, value)` pairs. Keys without the
    /// `KUBESIM_` prefix and unknown keys are ignored.
    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "AUTO_SCALE" => self.autoscale.enabled = parse_bool(&key, &value)?,
                "SCHEDULING_ALGO" => {
                    self.scheduler.algorithm = value
                        .parse()
                        .map_err(|e: crate::UnknownAlgorithm| invalid(&key, &value, e.to_string()))?;
                }
                "DEFAULT_NODE_CAPACITY" => {
                    self.autoscale.default_node_capacity = parse_num(&key, &value)?;
                }
                "AUTO_SCALE_HIGH_THRESHOLD" => {
                    self.autoscale.high_threshold = parse_num(&key, &value)?;
                }
                "AUTO_SCALE_LOW_THRESHOLD" => {
                    self.autoscale.low_threshold = parse_num(&key, &value)?;
                }
                "HEARTBEAT_TIMEOUT" => {
                    self.health.heartbeat_timeout_secs = parse_num(&key, &value)?;
                }
                "HEAVENLY_RESTRICTION" => self.agent.strict_limits = parse_bool(&key, &value)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.health.heartbeat_timeout_secs == 0 {
            return Err(ConfigError::Invalid("health.heartbeat_timeout_secs must be > 0".into()));
        }
        if self.health.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("health.sweep_interval_secs must be > 0".into()));
        }
        if self.health.evict_after_secs == Some(0) {
            return Err(ConfigError::Invalid("health.evict_after_secs must be > 0 when set".into()));
        }

        let scale = &self.autoscale;
        if scale.default_node_capacity == 0 {
            return Err(ConfigError::Invalid("autoscale.default_node_capacity must be > 0".into()));
        }
        if scale.interval_secs == 0 {
            return Err(ConfigError::Invalid("autoscale.interval_secs must be > 0".into()));
        }
        for (name, value) in [("high_threshold", scale.high_threshold), ("low_threshold", scale.low_threshold)] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "autoscale.{name} must be within 0..=100, got {value}"
                )));
            }
        }
        if scale.low_threshold > scale.high_threshold {
            return Err(ConfigError::Invalid(format!(
                "autoscale.low_threshold ({}) exceeds high_threshold ({})",
                scale.low_threshold, scale.high_threshold
            )));
        }

        let agent = &self.agent;
        if agent.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid("agent.heartbeat_interval_secs must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&agent.crash_probability) {
            return Err(ConfigError::Invalid(format!(
                "agent.crash_probability must be within 0..=1, got {}",
                agent.crash_probability
            )));
        }
        if !agent.load_factor.is_finite() || agent.load_factor < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "agent.load_factor must be a non-negative number, got {}",
                agent.load_factor
            )));
        }
        Ok(())
    }
}

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidOverride {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected a boolean")),
    }
}

fn parse_num<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| invalid(key, value, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config: KubesimConfig = toml::from_str("").unwrap();
        assert_eq!(config, KubesimConfig::default());
        assert_eq!(config.scheduler.algorithm, SchedulingAlgorithm::BestFit);
        assert_eq!(config.health.heartbeat_timeout_secs, 10);
        assert_eq!(config.autoscale.default_node_capacity, 4);
        assert!(!config.autoscale.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn parses_partial_sections() {
        let toml_str = r#"
[scheduler]
algorithm = "worst-fit"

[autoscale]
enabled = true
high_threshold = 75.0

[health]
evict_after_secs = 120
"#;
        let config: KubesimConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.scheduler.algorithm, SchedulingAlgorithm::WorstFit);
        assert!(config.autoscale.enabled);
        assert_eq!(config.autoscale.high_threshold, 75.0);
        assert_eq!(config.autoscale.low_threshold, 0.0);
        assert_eq!(config.health.evict_after(), Some(Duration::from_secs(120)));
        assert_eq!(config.health.sweep_interval(), Duration::from_secs(5));
    }

    #[test]
    fn rejects_unknown_algorithm_in_file() {
        let toml_str = r#"
[scheduler]
algorithm = "random-fit"
"#;
        assert!(toml::from_str::<KubesimConfig>(toml_str).is_err());
    }

    #[test]
    fn toml_round_trip() {
        let mut config = KubesimConfig::default();
        config.scheduler.algorithm = SchedulingAlgorithm::FirstFit;
        config.health.evict_after_secs = Some(30);
        let text = config.to_toml_string().unwrap();
        let back: KubesimConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = KubesimConfig::default();
        config
            .apply_overrides(vars(&[
                ("KUBESIM_AUTO_SCALE", "true"),
                ("KUBESIM_SCHEDULING_ALGO", "first-fit"),
                ("KUBESIM_DEFAULT_NODE_CAPACITY", "8"),
                ("KUBESIM_AUTO_SCALE_HIGH_THRESHOLD", "90"),
                ("KUBESIM_AUTO_SCALE_LOW_THRESHOLD", "10.5"),
                ("KUBESIM_HEARTBEAT_TIMEOUT", "15"),
                ("KUBESIM_HEAVENLY_RESTRICTION", "yes"),
                ("PATH", "/usr/bin"),
                ("KUBESIM_UNRELATED", "x"),
            ]))
            .unwrap();

        assert!(config.autoscale.enabled);
        assert_eq!(config.scheduler.algorithm, SchedulingAlgorithm::FirstFit);
        assert_eq!(config.autoscale.default_node_capacity, 8);
        assert_eq!(config.autoscale.high_threshold, 90.0);
        assert_eq!(config.autoscale.low_threshold, 10.5);
        assert_eq!(config.health.heartbeat_timeout_secs, 15);
        assert!(config.agent.strict_limits);
    }

    #[test]
    fn bad_override_reports_key() {
        let mut config = KubesimConfig::default();
        let err = config
            .apply_overrides(vars(&[("KUBESIM_DEFAULT_NODE_CAPACITY", "four")]))
            .unwrap_err();
        match err {
            ConfigError::InvalidOverride { key, value, .. } => {
                assert_eq!(key, "KUBESIM_DEFAULT_NODE_CAPACITY");
                assert_eq!(value, "four");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn bad_boolean_override_is_rejected() {
        let mut config = KubesimConfig::default();
        assert!(config
            .apply_overrides(vars(&[("KUBESIM_AUTO_SCALE", "maybe")]))
            .is_err());
    }

    #[test]
    fn validate_rejects_inverted_thresholds() {
        let mut config = KubesimConfig::default();
        config.autoscale.low_threshold = 90.0;
        config.autoscale.high_threshold = 50.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut config = KubesimConfig::default();
        config.autoscale.high_threshold = 150.0;
        assert!(config.validate().is_err());

        let mut config = KubesimConfig::default();
        config.autoscale.default_node_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = KubesimConfig::default();
        config.health.heartbeat_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = KubesimConfig::default();
        config.agent.crash_probability = 1.5;
        assert!(config.validate().is_err());

        let mut config = KubesimConfig::default();
        config.health.evict_after_secs = Some(0);
        assert!(config.validate().is_err());
    }
}
