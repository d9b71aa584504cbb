use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cache::{CacheKey, CacheStats, TwoTierCache};
use chrono::{DateTime, Utc};
use monitor::{
    AlertManager, AlertSummary, LogAlertHandler, MetricsSnapshot, Monitor, WebhookAlertHandler,
    spawn_alert_loop_with_probe,
};
use provider::{
    CircuitState, EmbeddingError, EmbeddingProvider, EmbeddingResult, HealthStatus, LocalProvider,
    ProviderHealth, ProviderKind, RemoteProvider, ResilienceConfig, ResilientProvider,
};
use router::{
    EmbeddingContext, ReasonCode, RouteRequest, Router, RoutingDecision, RoutingSignals,
};
use serde::Serialize;
use shadow::{Embedder, MigrationRecommendation, ShadowComparator, ShadowStats};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ConfigLoadError, HybridConfig};
use crate::error::HybridError;
use crate::warmup;

/// How long [`HybridEmbeddingService::shutdown`] waits for shadow comparisons.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-call knobs for [`HybridEmbeddingService::embed`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbedOptions {
    pub context: EmbeddingContext,
    pub preferred: Option<ProviderKind>,
    /// Skip the cache read. Fresh results are still written back.
    pub force_fresh: bool,
}

impl EmbedOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, context: EmbeddingContext) -> Self {
        self.context = context;
        self
    }

    pub fn prefer(mut self, provider: ProviderKind) -> Self {
        self.preferred = Some(provider);
        self
    }

    pub fn fresh(mut self) -> Self {
        self.force_fresh = true;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    pub enabled: bool,
    pub local: ProviderHealth,
    /// `None` when remote is disabled or failed to initialize.
    pub remote: Option<ProviderHealth>,
    pub remote_circuit: Option<CircuitState>,
    pub cache: Option<CacheStats>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceMetrics {
    pub monitor: MetricsSnapshot,
    pub cache: Option<CacheStats>,
    pub shadow: Option<ShadowStats>,
    pub migration: Option<MigrationRecommendation>,
    pub alerts: AlertSummary,
    pub remote_available: bool,
}

/// Entry point for embedding text. Build once, share as `Arc`.
///
/// Each call is routed to a provider, served from cache where possible,
/// retried on the fallback provider when the router allows it, and recorded
/// in the [`Monitor`].
pub struct HybridEmbeddingService {
    config: HybridConfig,
    local: Arc<dyn EmbeddingProvider>,
    remote: Option<Arc<dyn EmbeddingProvider>>,
    cache: Option<TwoTierCache>,
    router: Router,
    monitor: Arc<Monitor>,
    alerts: Arc<AlertManager>,
    shadow: ShadowComparator,
    remote_healthy: Arc<AtomicBool>,
    alert_task: Mutex<Option<JoinHandle<()>>>,
}

impl HybridEmbeddingService {
    /// Build the providers from `config` and assemble the service.
    ///
    /// A local provider that fails to initialize is fatal. A remote one is
    /// logged and left out for the lifetime of the process.
    pub async fn new(config: HybridConfig) -> Result<Self, HybridError> {
        config.validate()?;
        let local: Arc<dyn EmbeddingProvider> = Arc::new(LocalProvider::new(config.local.clone())?);

        let remote = if config.enabled && config.remote.enabled {
            match RemoteProvider::new(config.remote.clone()) {
                Ok(inner) => {
                    let resilience = ResilienceConfig::from(&config.remote);
                    Some(Arc::new(ResilientProvider::new(inner, resilience))
                        as Arc<dyn EmbeddingProvider>)
                }
                Err(e) => {
                    warn!(error = %e, "remote provider could not be built; running local only");
                    None
                }
            }
        } else {
            None
        };

        Self::with_providers(config, local, remote).await
    }

    /// Assemble the service around already constructed providers.
    pub async fn with_providers(
        config: HybridConfig,
        local: Arc<dyn EmbeddingProvider>,
        remote: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Result<Self, HybridError> {
        config.validate()?;
        local.initialize().await?;

        let remote = match remote {
            Some(remote) if config.enabled && config.remote.enabled => {
                match remote.initialize().await {
                    Ok(()) => Some(remote),
                    Err(e) => {
                        warn!(
                            provider = %remote.info().name,
                            error = %e,
                            "remote provider unavailable; disabled for this process"
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        let cache = if config.enabled && config.caching {
            Some(TwoTierCache::new(config.cache.clone())?)
        } else {
            None
        };

        let remote_cost = remote
            .as_ref()
            .map(|r| r.info().cost_per_1k_tokens)
            .unwrap_or(config.remote.cost_per_1k_tokens);
        let router = Router::new(config.routing_policy.clone(), remote_cost)
            .map_err(|e| ConfigLoadError::Validation(e.to_string()))?;

        let monitor = Arc::new(Monitor::new(config.monitor_config()));
        let alerts = AlertManager::new(config.alerts.clone());
        alerts.add_handler(Arc::new(LogAlertHandler));
        if let Some(url) = &config.alerts.webhook_url {
            match WebhookAlertHandler::new(url.clone()) {
                Ok(handler) => alerts.add_handler(Arc::new(handler)),
                Err(e) => warn!(error = %e, "alert webhook disabled"),
            }
        }
        let shadow = ShadowComparator::new(config.shadow.clone()).with_monitor(Arc::clone(&monitor));

        let service = Self {
            local,
            remote,
            cache,
            router,
            monitor,
            alerts: Arc::new(alerts),
            shadow,
            remote_healthy: Arc::new(AtomicBool::new(true)),
            alert_task: Mutex::new(None),
            config,
        };

        info!(
            enabled = service.config.enabled,
            remote = service.remote.is_some(),
            caching = service.cache.is_some(),
            routing = service.config.routing,
            shadow_mode = service.config.shadow_mode,
            "hybrid embedding service ready"
        );

        if service.cache.is_some() && service.config.cache.warm_up {
            match service.warm_up().await {
                Ok(terms) => info!(terms, "embedding cache warmed"),
                Err(e) => warn!(error = %e, "cache warm-up failed"),
            }
        }

        Ok(service)
    }

    pub fn config(&self) -> &HybridConfig {
        &self.config
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    pub fn shadow(&self) -> &ShadowComparator {
        &self.shadow
    }

    /// Whether a remote provider was configured and initialized.
    pub fn remote_available(&self) -> bool {
        self.remote.is_some()
    }

    /// Embed `texts`, returning one result per input in input order.
    ///
    /// Empty input gives empty output. Blank texts are rejected before any
    /// routing happens.
    pub async fn embed(
        &self,
        texts: &[String],
        options: &EmbedOptions,
    ) -> Result<Vec<EmbeddingResult>, HybridError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(pos) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput(format!("text at position {pos} is empty")).into());
        }

        if !self.config.enabled {
            return Ok(self.local.generate(texts).await?);
        }

        let decision = self.decide(texts, options);
        match self.serve(decision.provider, texts, options.force_fresh).await {
            Ok(results) => {
                self.monitor.record_routing(
                    decision.provider,
                    decision.provider,
                    decision.reason.as_str(),
                );
                Ok(results)
            }
            Err(primary_err) => {
                let fallback = decision
                    .fallback
                    .filter(|_| decision.reason != ReasonCode::PiiDetected);
                let Some(fallback) = fallback else {
                    return Err(primary_err.into());
                };
                warn!(
                    from = %decision.provider,
                    to = %fallback,
                    reason = decision.reason.as_str(),
                    error = %primary_err,
                    "primary provider failed; using fallback"
                );
                let results = self.serve(fallback, texts, options.force_fresh).await?;
                self.monitor
                    .record_routing(decision.provider, fallback, decision.reason.as_str());
                Ok(results)
            }
        }
    }

    pub async fn embed_one(
        &self,
        text: &str,
        options: &EmbedOptions,
    ) -> Result<EmbeddingResult, HybridError> {
        let mut results = self.embed(&[text.to_string()], options).await?;
        results.pop().ok_or_else(|| {
            EmbeddingError::MalformedResponse("no embedding returned".into()).into()
        })
    }

    /// Probe both providers and report overall status. Results are also
    /// recorded in the monitor and feed the router's health signal.
    pub async fn health_check(&self) -> ServiceHealth {
        let (local, remote, remote_circuit) = self.probe().run().await;

        let remote_lost = self.config.enabled && self.config.remote.enabled && self.remote.is_none();
        let status = overall_status(&local, remote.as_ref(), remote_lost);
        debug!(status = ?status, "health check complete");

        ServiceHealth {
            status,
            enabled: self.config.enabled,
            local,
            remote,
            remote_circuit,
            cache: self.cache_stats().await,
            checked_at: Utc::now(),
        }
    }

    pub async fn get_metrics(&self) -> ServiceMetrics {
        let shadow = self.config.shadow_mode.then(|| self.shadow.stats());
        ServiceMetrics {
            monitor: self.monitor.snapshot(),
            cache: self.cache_stats().await,
            migration: shadow.as_ref().map(ShadowStats::recommendation),
            shadow,
            alerts: self.alerts.summary(),
            remote_available: self.remote.is_some(),
        }
    }

    /// Embed the financial vocabulary locally and cache it. Returns the
    /// number of terms now cached.
    pub async fn warm_up(&self) -> Result<usize, HybridError> {
        if self.cache.is_none() {
            return Err(HybridError::Disabled("caching"));
        }
        let terms = warmup::vocabulary();
        let results = self.serve(ProviderKind::Local, &terms, false).await?;
        Ok(results.len())
    }

    /// Serve `texts` from `legacy` while this service runs as the shadow
    /// candidate in the background.
    pub async fn shadow_embed(
        self: &Arc<Self>,
        texts: &[String],
        legacy: Arc<dyn Embedder>,
    ) -> Result<Vec<EmbeddingResult>, HybridError> {
        if !self.config.shadow_mode {
            return Err(HybridError::Disabled("shadow mode"));
        }
        let candidate: Arc<dyn Embedder> = self.clone();
        Ok(self.shadow.run(texts, legacy, candidate).await?)
    }

    /// Start the monitoring loop: every `alerts.poll_interval` it probes both
    /// providers, records health and circuit state, then runs the alert
    /// checks. Does nothing when monitoring is off or the loop is already
    /// running. Must be called inside a tokio runtime.
    pub fn start_background_tasks(&self) {
        if !self.config.enabled || !self.config.monitoring {
            debug!("monitoring disabled; no background tasks");
            return;
        }
        let mut slot = lock(&self.alert_task);
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let interval = self.config.alerts.poll_interval;
        let probe = self.probe();
        *slot = Some(spawn_alert_loop_with_probe(
            Arc::clone(&self.monitor),
            Arc::clone(&self.alerts),
            interval,
            move || {
                let probe = probe.clone();
                async move {
                    probe.run().await;
                }
            },
        ));
        info!(interval_ms = interval.as_millis() as u64, "monitoring loop started");
    }

    pub fn background_tasks_running(&self) -> bool {
        lock(&self.alert_task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop the alert loop and give in-flight shadow comparisons a short
    /// grace period.
    pub async fn shutdown(&self) {
        let task = lock(&self.alert_task).take();
        if let Some(task) = task {
            task.abort();
        }
        if !self.shadow.wait_idle(SHUTDOWN_GRACE).await {
            warn!(
                pending = self.shadow.pending(),
                "shadow comparisons still running at shutdown"
            );
        }
        info!("hybrid embedding service stopped");
    }

    fn probe(&self) -> ProviderProbe {
        ProviderProbe {
            local: Arc::clone(&self.local),
            remote: self.remote.clone(),
            monitor: Arc::clone(&self.monitor),
            remote_healthy: Arc::clone(&self.remote_healthy),
        }
    }

    fn decide(&self, texts: &[String], options: &EmbedOptions) -> RoutingDecision {
        let signals = self.signals();
        if !self.config.routing && options.preferred != Some(ProviderKind::Remote) {
            return RoutingDecision {
                provider: ProviderKind::Local,
                reason: ReasonCode::DefaultLocal,
                confidence: 1.0,
                cost_estimate: 0.0,
                latency_estimate: signals.local_latency_estimate,
                fallback: None,
            };
        }
        let request = RouteRequest::new(texts)
            .with_context(options.context)
            .with_preferred(options.preferred);
        self.router.route(&request, &signals)
    }

    fn signals(&self) -> RoutingSignals {
        let defaults = RoutingSignals::default();
        RoutingSignals {
            remote_enabled: self.remote.is_some(),
            remote_healthy: self.remote_healthy.load(Ordering::Acquire),
            remote_circuit: self.remote.as_ref().and_then(|r| r.circuit_state()),
            daily_spend: self.monitor.daily_spend(),
            local_latency_estimate: self
                .monitor
                .latency_estimate(ProviderKind::Local)
                .unwrap_or(defaults.local_latency_estimate),
            remote_latency_estimate: self
                .monitor
                .latency_estimate(ProviderKind::Remote)
                .unwrap_or(defaults.remote_latency_estimate),
        }
    }

    fn provider(&self, kind: ProviderKind) -> Result<&Arc<dyn EmbeddingProvider>, EmbeddingError> {
        match kind {
            ProviderKind::Local => Ok(&self.local),
            ProviderKind::Remote => self.remote.as_ref().ok_or_else(|| {
                EmbeddingError::ProviderUnavailable("remote provider is not available".into())
            }),
        }
    }

    /// Cache lookup, generation of the misses on `kind`, cache population,
    /// then metrics. Results come back in input order.
    async fn serve(
        &self,
        kind: ProviderKind,
        texts: &[String],
        force_fresh: bool,
    ) -> Result<Vec<EmbeddingResult>, EmbeddingError> {
        let provider = self.provider(kind)?;
        let info = provider.info();
        let keys: Vec<CacheKey> = match &self.cache {
            Some(_) => texts
                .iter()
                .map(|t| CacheKey::new(t, kind, &info.model, info.dimension))
                .collect(),
            None => Vec::new(),
        };

        let mut slots: Vec<Option<EmbeddingResult>> = vec![None; texts.len()];
        if let Some(cache) = self.cache.as_ref().filter(|_| !force_fresh) {
            for (slot, key) in slots.iter_mut().zip(&keys) {
                match cache.get(key).await {
                    Some(hit) => {
                        self.monitor.record_cache_hit(hit.tier);
                        *slot = Some(hit.result);
                    }
                    None => self.monitor.record_cache_miss(),
                }
            }
        }

        let missing: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.is_none().then_some(i))
            .collect();
        if missing.is_empty() {
            debug!(provider = %kind, texts = texts.len(), "served entirely from cache");
            return Ok(slots.into_iter().flatten().collect());
        }

        let pending: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
        let started = Instant::now();
        let outcome = provider.generate(&pending).await;
        let elapsed = started.elapsed();
        if let Some(state) = provider.circuit_state() {
            self.monitor.record_circuit_state(kind, state);
        }
        let fresh = match outcome {
            Ok(fresh) if fresh.len() == pending.len() => fresh,
            Ok(fresh) => {
                let err = EmbeddingError::MalformedResponse(format!(
                    "expected {} embeddings, got {}",
                    pending.len(),
                    fresh.len()
                ));
                self.monitor.record_error(kind, &err);
                return Err(err);
            }
            Err(e) => {
                self.monitor.record_error(kind, &e);
                return Err(e);
            }
        };
        if kind == ProviderKind::Remote {
            self.remote_healthy.store(true, Ordering::Release);
        }

        let tokens: u64 = fresh.iter().filter_map(|r| r.tokens).map(u64::from).sum();
        let cost: f64 = fresh.iter().filter_map(|r| r.cost).sum();
        for (&i, result) in missing.iter().zip(fresh) {
            if let Some(cache) = &self.cache {
                cache.set(&keys[i], &result).await;
            }
            slots[i] = Some(result);
        }
        self.monitor
            .record_embedding(kind, elapsed, tokens, cost, pending.len());

        debug!(
            provider = %kind,
            texts = texts.len(),
            generated = pending.len(),
            latency_ms = elapsed.as_millis() as u64,
            cost_usd = cost,
            "embeddings served"
        );
        Ok(slots.into_iter().flatten().collect())
    }

    async fn cache_stats(&self) -> Option<CacheStats> {
        match &self.cache {
            Some(cache) => Some(cache.stats().await),
            None => None,
        }
    }
}

/// Provider health probe shared by [`HybridEmbeddingService::health_check`]
/// and the background loop.
#[derive(Clone)]
struct ProviderProbe {
    local: Arc<dyn EmbeddingProvider>,
    remote: Option<Arc<dyn EmbeddingProvider>>,
    monitor: Arc<Monitor>,
    remote_healthy: Arc<AtomicBool>,
}

impl ProviderProbe {
    /// Check both providers, record the results in the monitor and update the
    /// router's remote health signal.
    async fn run(&self) -> (ProviderHealth, Option<ProviderHealth>, Option<CircuitState>) {
        let local = self.local.health_check().await;
        let remote = match &self.remote {
            Some(remote) => Some(remote.health_check().await),
            None => None,
        };
        let remote_circuit = self.remote.as_ref().and_then(|r| r.circuit_state());

        if let Some(health) = &remote {
            self.remote_healthy
                .store(health.status.is_usable(), Ordering::Release);
            self.monitor.record_health(health.clone());
        }
        if let Some(state) = remote_circuit {
            self.monitor.record_circuit_state(ProviderKind::Remote, state);
        }
        self.monitor.record_health(local.clone());
        (local, remote, remote_circuit)
    }
}

impl Drop for HybridEmbeddingService {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.alert_task).take() {
            task.abort();
        }
    }
}

#[async_trait]
impl Embedder for HybridEmbeddingService {
    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingResult>, EmbeddingError> {
        HybridEmbeddingService::embed(self, texts, &EmbedOptions::default())
            .await
            .map_err(EmbeddingError::from)
    }
}

fn overall_status(
    local: &ProviderHealth,
    remote: Option<&ProviderHealth>,
    remote_lost: bool,
) -> HealthStatus {
    if !local.status.is_usable() {
        return HealthStatus::Unhealthy;
    }
    let remote_degraded = remote_lost || remote.is_some_and(|r| r.status != HealthStatus::Healthy);
    if remote_degraded || local.status == HealthStatus::Degraded {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_builder() {
        let options = EmbedOptions::new()
            .with_context(EmbeddingContext::Batch)
            .prefer(ProviderKind::Remote)
            .fresh();
        assert_eq!(options.context, EmbeddingContext::Batch);
        assert_eq!(options.preferred, Some(ProviderKind::Remote));
        assert!(options.force_fresh);
        assert_eq!(EmbedOptions::default().context, EmbeddingContext::Default);
    }

    #[test]
    fn overall_status_follows_worst_usable_provider() {
        let healthy_local = ProviderHealth::healthy(ProviderKind::Local, Duration::from_millis(3));
        let healthy_remote = ProviderHealth::healthy(ProviderKind::Remote, Duration::from_millis(90));
        let down_remote = ProviderHealth::unhealthy(ProviderKind::Remote, "circuit breaker open");

        assert_eq!(
            overall_status(&healthy_local, Some(&healthy_remote), false),
            HealthStatus::Healthy
        );
        assert_eq!(overall_status(&healthy_local, None, false), HealthStatus::Healthy);
        assert_eq!(
            overall_status(&healthy_local, Some(&down_remote), false),
            HealthStatus::Degraded
        );
        assert_eq!(overall_status(&healthy_local, None, true), HealthStatus::Degraded);

        let down_local = ProviderHealth::unhealthy(ProviderKind::Local, "model missing");
        assert_eq!(
            overall_status(&down_local, Some(&healthy_remote), false),
            HealthStatus::Unhealthy
        );
    }
}
