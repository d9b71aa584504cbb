use crate::config::{RoutingConfigError, RoutingPolicy};
use crate::pii::PiiDetector;
use crate::types::{EmbeddingContext, ReasonCode, RouteRequest, RoutingDecision, RoutingSignals};
use provider::{estimate_tokens, CircuitState, ProviderKind};
use std::time::Duration;
use tracing::debug;

/// Pure decision logic: the same request and signals always give the same
/// decision.
#[derive(Debug, Clone)]
pub struct Router {
    policy: RoutingPolicy,
    remote_cost_per_1k: f64,
    pii: PiiDetector,
}

impl Router {
    pub fn new(policy: RoutingPolicy, remote_cost_per_1k: f64) -> Result<Self, RoutingConfigError> {
        policy.validate()?;
        if !remote_cost_per_1k.is_finite() || remote_cost_per_1k < 0.0 {
            return Err(RoutingConfigError::Invalid(
                "remote cost_per_1k_tokens must be a non-negative number".into(),
            ));
        }
        Ok(Self {
            policy,
            remote_cost_per_1k,
            pii: PiiDetector::new(),
        })
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    pub fn pii_detector(&self) -> &PiiDetector {
        &self.pii
    }

    /// USD the remote provider would charge for `texts`.
    pub fn projected_remote_cost(&self, texts: &[String]) -> f64 {
        let tokens: u64 = texts.iter().map(|t| u64::from(estimate_tokens(t))).sum();
        tokens as f64 / 1000.0 * self.remote_cost_per_1k
    }

    pub fn route(&self, request: &RouteRequest<'_>, signals: &RoutingSignals) -> RoutingDecision {
        let decision = self.decide(request, signals);
        debug!(
            provider = %decision.provider,
            reason = %decision.reason,
            confidence = decision.confidence,
            cost_estimate = decision.cost_estimate,
            fallback = ?decision.fallback,
            texts = request.texts.len(),
            context = %request.context,
            "routing decision"
        );
        decision
    }

    fn decide(&self, request: &RouteRequest<'_>, signals: &RoutingSignals) -> RoutingDecision {
        let projected = self.projected_remote_cost(request.texts);
        let remote_open = matches!(signals.remote_circuit, Some(CircuitState::Open));
        let remote_usable = signals.remote_enabled && signals.remote_healthy && !remote_open;
        let plan = Plan {
            projected,
            signals,
        };

        // Personal data never leaves the process, whatever else was asked for.
        if self.pii.any_contains_pii(request.texts) {
            return plan.local(ReasonCode::PiiDetected, 1.0, None);
        }

        if let Some(preferred) = request.preferred {
            return match preferred {
                ProviderKind::Remote if !signals.remote_enabled => {
                    plan.local(ReasonCode::RemoteDisabled, 1.0, None)
                }
                ProviderKind::Remote => plan.remote(
                    ReasonCode::ExplicitPreference,
                    1.0,
                    Some(ProviderKind::Local),
                ),
                ProviderKind::Local => plan.local(
                    ReasonCode::ExplicitPreference,
                    1.0,
                    remote_usable.then_some(ProviderKind::Remote),
                ),
            };
        }

        if !signals.remote_enabled {
            return plan.local(ReasonCode::RemoteDisabled, 1.0, None);
        }
        if remote_open {
            return plan.local(ReasonCode::CircuitOpen, 0.95, None);
        }
        if !signals.remote_healthy {
            return plan.local(ReasonCode::RemoteUnhealthy, 0.95, None);
        }

        if signals.daily_spend + projected > self.policy.daily_budget_usd {
            return plan.local(ReasonCode::BudgetExceeded, 0.9, None);
        }
        if projected > self.policy.max_cost_per_request_usd {
            return plan.local(ReasonCode::RequestCostCeiling, 0.9, None);
        }

        if request.texts.len() > self.policy.large_batch_threshold {
            return plan.local(ReasonCode::LargeBatch, 0.85, Some(ProviderKind::Remote));
        }

        match request.context {
            EmbeddingContext::Realtime => {
                if signals.local_latency_estimate < self.policy.realtime_latency_threshold {
                    plan.local(ReasonCode::RealtimeFastLocal, 0.8, Some(ProviderKind::Remote))
                } else {
                    plan.remote(ReasonCode::RealtimeRemote, 0.7, Some(ProviderKind::Local))
                }
            }
            EmbeddingContext::Batch => {
                plan.local(ReasonCode::BatchContext, 0.8, Some(ProviderKind::Remote))
            }
            EmbeddingContext::QualitySensitive => {
                plan.remote(ReasonCode::QualitySensitive, 0.75, Some(ProviderKind::Local))
            }
            EmbeddingContext::Default => {
                plan.local(ReasonCode::DefaultLocal, 0.6, Some(ProviderKind::Remote))
            }
        }
    }
}

struct Plan<'a> {
    projected: f64,
    signals: &'a RoutingSignals,
}

impl Plan<'_> {
    fn local(
        &self,
        reason: ReasonCode,
        confidence: f64,
        fallback: Option<ProviderKind>,
    ) -> RoutingDecision {
        self.decision(ProviderKind::Local, reason, confidence, fallback)
    }

    fn remote(
        &self,
        reason: ReasonCode,
        confidence: f64,
        fallback: Option<ProviderKind>,
    ) -> RoutingDecision {
        self.decision(ProviderKind::Remote, reason, confidence, fallback)
    }

    fn decision(
        &self,
        provider: ProviderKind,
        reason: ReasonCode,
        confidence: f64,
        fallback: Option<ProviderKind>,
    ) -> RoutingDecision {
        let (cost_estimate, latency_estimate): (f64, Duration) = match provider {
            ProviderKind::Local => (0.0, self.signals.local_latency_estimate),
            ProviderKind::Remote => (self.projected, self.signals.remote_latency_estimate),
        };
        RoutingDecision {
            provider,
            reason,
            confidence,
            cost_estimate,
            latency_estimate,
            fallback,
        }
    }
}
