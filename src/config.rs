//! Runtime configuration.
//!
//! Operational knobs live in configuration, not code: tier thresholds,
//! circuit breaker limits, scheduling cadence, queue bounds and quality
//! weights. Configs load from YAML or JSON and accept environment overrides
//! for the knobs operators most often need to turn in place.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::profile::QualityWeights;
use crate::resource::TierThresholds;
use crate::{Error, ErrorContext, Result};

/// Circuit breaker settings (see
/// [`CircuitBreakerConfig`](crate::resilience::CircuitBreakerConfig)).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub probe_interval_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            probe_interval_ms: 10_000,
        }
    }
}

impl BreakerSettings {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

/// Scheduling cycle settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Fixed cadence of the scheduling cycle.
    pub cycle_interval_ms: u64,
    /// Queue depth that triggers an immediate cycle between ticks.
    pub queue_depth_trigger: usize,
    /// Maximum requests dispatched and unfinished at once.
    pub max_concurrent: usize,
    /// Queue wait after which a request is force-routed to fallback.
    pub max_queue_wait_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 100,
            queue_depth_trigger: 8,
            max_concurrent: 16,
            max_queue_wait_ms: 10_000,
        }
    }
}

impl SchedulerSettings {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }

    pub fn max_queue_wait(&self) -> Duration {
        Duration::from_millis(self.max_queue_wait_ms)
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub thresholds: TierThresholds,
    pub breaker: BreakerSettings,
    pub scheduler: SchedulerSettings,
    pub quality_weights: QualityWeights,
    /// Capacity of the built-in result cache; 0 disables it.
    pub cache_capacity: usize,
}

impl RuntimeConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Apply `VECTORFORGE_*` environment overrides for operational knobs.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Some(v) = read_env_u64("VECTORFORGE_CYCLE_INTERVAL_MS")? {
            self.scheduler.cycle_interval_ms = v;
        }
        if let Some(v) = read_env_u64("VECTORFORGE_MAX_QUEUE_WAIT_MS")? {
            self.scheduler.max_queue_wait_ms = v;
        }
        if let Some(v) = read_env_u64("VECTORFORGE_MAX_CONCURRENT")? {
            self.scheduler.max_concurrent = v as usize;
        }
        if let Some(v) = read_env_u64("VECTORFORGE_BREAKER_THRESHOLD")? {
            self.breaker.failure_threshold = v as u32;
        }
        if let Some(v) = read_env_u64("VECTORFORGE_BREAKER_RESET_MS")? {
            self.breaker.reset_timeout_ms = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent == 0 {
            return Err(Error::configuration_with_context(
                "max_concurrent must be positive",
                ErrorContext::new().with_field_path("scheduler.max_concurrent"),
            ));
        }
        if self.scheduler.cycle_interval_ms == 0 {
            return Err(Error::configuration_with_context(
                "cycle interval must be positive",
                ErrorContext::new().with_field_path("scheduler.cycle_interval_ms"),
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(Error::configuration_with_context(
                "failure threshold must be positive",
                ErrorContext::new().with_field_path("breaker.failure_threshold"),
            ));
        }
        self.quality_weights.validate()?;
        Ok(())
    }
}

fn read_env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Err(_) => Ok(None),
        Ok(raw) => raw.trim().parse::<u64>().map(Some).map_err(|_| {
            Error::configuration_with_context(
                "environment override is not a number",
                ErrorContext::new()
                    .with_field_path(name)
                    .with_details(format!("got {raw:?}"))
                    .with_source("env"),
            )
        }),
    }
}
