use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RoutingConfigError {
    #[error("invalid routing policy: {0}")]
    Invalid(String),
}

/// Budget and threshold knobs read by [`Router`](crate::Router).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingPolicy {
    /// Rolling USD ceiling for remote spend per UTC day.
    pub daily_budget_usd: f64,
    pub max_cost_per_request_usd: f64,
    /// Batches strictly larger than this go local.
    pub large_batch_threshold: usize,
    #[serde(
        with = "provider::serde_duration::millis",
        rename = "realtime_latency_threshold_ms"
    )]
    pub realtime_latency_threshold: Duration,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            daily_budget_usd: 10.0,
            max_cost_per_request_usd: 1.0,
            large_batch_threshold: 100,
            realtime_latency_threshold: Duration::from_millis(100),
        }
    }
}

impl RoutingPolicy {
    pub fn validate(&self) -> Result<(), RoutingConfigError> {
        if !self.daily_budget_usd.is_finite() || self.daily_budget_usd < 0.0 {
            return Err(RoutingConfigError::Invalid(
                "daily_budget_usd must be a non-negative number".into(),
            ));
        }
        if !self.max_cost_per_request_usd.is_finite() || self.max_cost_per_request_usd < 0.0 {
            return Err(RoutingConfigError::Invalid(
                "max_cost_per_request_usd must be a non-negative number".into(),
            ));
        }
        if self.large_batch_threshold == 0 {
            return Err(RoutingConfigError::Invalid(
                "large_batch_threshold must be > 0".into(),
            ));
        }
        Ok(())
    }
}
