use provider::{CircuitState, ProviderKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Caller-declared intent for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingContext {
    Realtime,
    Batch,
    QualitySensitive,
    #[default]
    Default,
}

impl EmbeddingContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingContext::Realtime => "realtime",
            EmbeddingContext::Batch => "batch",
            EmbeddingContext::QualitySensitive => "quality_sensitive",
            EmbeddingContext::Default => "default",
        }
    }
}

impl fmt::Display for EmbeddingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmbeddingContext {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "realtime" | "real_time" => Ok(EmbeddingContext::Realtime),
            "batch" => Ok(EmbeddingContext::Batch),
            "quality_sensitive" | "quality" => Ok(EmbeddingContext::QualitySensitive),
            "default" => Ok(EmbeddingContext::Default),
            other => Err(format!("unknown embedding context '{other}'")),
        }
    }
}

/// Why the router picked a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    ExplicitPreference,
    PiiDetected,
    RemoteUnhealthy,
    CircuitOpen,
    BudgetExceeded,
    RequestCostCeiling,
    LargeBatch,
    RealtimeFastLocal,
    RealtimeRemote,
    BatchContext,
    QualitySensitive,
    DefaultLocal,
    RemoteDisabled,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::ExplicitPreference => "explicit_preference",
            ReasonCode::PiiDetected => "pii_detected",
            ReasonCode::RemoteUnhealthy => "remote_unhealthy",
            ReasonCode::CircuitOpen => "circuit_open",
            ReasonCode::BudgetExceeded => "budget_exceeded",
            ReasonCode::RequestCostCeiling => "request_cost_ceiling",
            ReasonCode::LargeBatch => "large_batch",
            ReasonCode::RealtimeFastLocal => "realtime_fast_local",
            ReasonCode::RealtimeRemote => "realtime_remote",
            ReasonCode::BatchContext => "batch_context",
            ReasonCode::QualitySensitive => "quality_sensitive",
            ReasonCode::DefaultLocal => "default_local",
            ReasonCode::RemoteDisabled => "remote_disabled",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteRequest<'a> {
    pub texts: &'a [String],
    pub context: EmbeddingContext,
    pub preferred: Option<ProviderKind>,
}

impl<'a> RouteRequest<'a> {
    pub fn new(texts: &'a [String]) -> Self {
        Self {
            texts,
            context: EmbeddingContext::Default,
            preferred: None,
        }
    }

    pub fn with_context(mut self, context: EmbeddingContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_preferred(mut self, preferred: Option<ProviderKind>) -> Self {
        self.preferred = preferred;
        self
    }
}

/// Live state the router reads. Built fresh for every request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingSignals {
    pub remote_enabled: bool,
    pub remote_healthy: bool,
    pub remote_circuit: Option<CircuitState>,
    /// USD spent today, UTC.
    pub daily_spend: f64,
    #[serde(with = "provider::serde_duration::millis")]
    pub local_latency_estimate: Duration,
    #[serde(with = "provider::serde_duration::millis")]
    pub remote_latency_estimate: Duration,
}

impl Default for RoutingSignals {
    fn default() -> Self {
        Self {
            remote_enabled: true,
            remote_healthy: true,
            remote_circuit: Some(CircuitState::Closed),
            daily_spend: 0.0,
            local_latency_estimate: Duration::from_millis(20),
            remote_latency_estimate: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub provider: ProviderKind,
    pub reason: ReasonCode,
    /// How strongly the rule that fired determines the outcome, 0..=1.
    pub confidence: f64,
    /// Projected USD cost of running the request on `provider`.
    pub cost_estimate: f64,
    #[serde(with = "provider::serde_duration::millis")]
    pub latency_estimate: Duration,
    /// Tried only if the primary call fails.
    pub fallback: Option<ProviderKind>,
}
