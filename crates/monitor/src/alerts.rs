use crate::handlers::AlertHandler;
use crate::monitor::MetricsSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    BudgetUtilization,
    CacheHitRate,
    LatencyP95,
    QualityDegradation,
    ErrorRate,
    CircuitBreakerOpen,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::BudgetUtilization => "budget_utilization",
            AlertType::CacheHitRate => "cache_hit_rate",
            AlertType::LatencyP95 => "latency_p95",
            AlertType::QualityDegradation => "quality_degradation",
            AlertType::ErrorRate => "error_rate",
            AlertType::CircuitBreakerOpen => "circuit_breaker_open",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub alert_type: AlertType,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl Alert {
    fn new(
        level: AlertLevel,
        alert_type: AlertType,
        message: String,
        value: f64,
        threshold: f64,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            level,
            alert_type,
            message,
            value,
            threshold,
            timestamp: at,
            context: Map::new(),
        }
    }

    fn with_context(mut self, key: &str, value: Value) -> Self {
        self.context.insert(key.to_string(), value);
        self
    }
}

/// Thresholds and cadence for [`AlertManager`]. All fields have defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub budget_warning: f64,
    pub budget_critical: f64,
    pub cache_hit_rate_min: f64,
    /// Rate checks stay quiet until this many observations exist.
    pub min_samples_for_rates: u64,
    #[serde(with = "provider::serde_duration::millis", rename = "latency_p95_max_ms")]
    pub latency_p95_max: Duration,
    pub similarity_warning: f64,
    pub similarity_critical: f64,
    pub error_rate_max: f64,
    #[serde(with = "provider::serde_duration::secs", rename = "cooldown_secs")]
    pub cooldown: Duration,
    #[serde(with = "provider::serde_duration::secs", rename = "poll_interval_secs")]
    pub poll_interval: Duration,
    #[serde(with = "provider::serde_duration::secs", rename = "history_retention_secs")]
    pub history_retention: Duration,
    pub webhook_url: Option<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            budget_warning: 0.80,
            budget_critical: 0.95,
            cache_hit_rate_min: 0.5,
            min_samples_for_rates: 20,
            latency_p95_max: Duration::from_secs(2),
            similarity_warning: 0.95,
            similarity_critical: 0.90,
            error_rate_max: 0.05,
            cooldown: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(60),
            history_retention: Duration::from_secs(24 * 60 * 60),
            webhook_url: None,
        }
    }
}

impl AlertConfig {
    pub fn validate(&self) -> Result<(), String> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(format!("{name} must be within 0..=1, got {v}"))
            }
        };
        unit("budget_warning", self.budget_warning)?;
        unit("budget_critical", self.budget_critical)?;
        unit("cache_hit_rate_min", self.cache_hit_rate_min)?;
        unit("error_rate_max", self.error_rate_max)?;
        if self.budget_warning > self.budget_critical {
            return Err("budget_warning must not exceed budget_critical".into());
        }
        if self.similarity_critical > self.similarity_warning {
            return Err("similarity_critical must not exceed similarity_warning".into());
        }
        if self.poll_interval.is_zero() {
            return Err("poll_interval_secs must be > 0".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub window_secs: u64,
    pub total: usize,
    pub by_level: BTreeMap<AlertLevel, usize>,
    pub by_type: BTreeMap<AlertType, usize>,
    pub latest: Option<Alert>,
}

struct AlertState {
    last_fired: HashMap<(AlertType, AlertLevel), DateTime<Utc>>,
    history: VecDeque<Alert>,
}

/// Evaluates snapshots against thresholds, suppresses repeats inside the
/// cooldown window and fans fired alerts out to handlers.
pub struct AlertManager {
    config: AlertConfig,
    handlers: RwLock<Vec<Arc<dyn AlertHandler>>>,
    state: Mutex<AlertState>,
}

impl AlertManager {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            handlers: RwLock::new(Vec::new()),
            state: Mutex::new(AlertState {
                last_fired: HashMap::new(),
                history: VecDeque::new(),
            }),
        }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    pub fn add_handler(&self, handler: Arc<dyn AlertHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Every threshold breach in `snapshot`, ignoring cooldown.
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> Vec<Alert> {
        let cfg = &self.config;
        let at = snapshot.timestamp;
        let mut alerts = Vec::new();

        let utilization = snapshot.cost.budget_utilization;
        let budget_level = if utilization >= cfg.budget_critical {
            Some((AlertLevel::Critical, cfg.budget_critical))
        } else if utilization >= cfg.budget_warning {
            Some((AlertLevel::Warning, cfg.budget_warning))
        } else {
            None
        };
        if let Some((level, threshold)) = budget_level {
            alerts.push(
                Alert::new(
                    level,
                    AlertType::BudgetUtilization,
                    format!(
                        "daily spend ${:.2} is {:.0}% of the ${:.2} budget",
                        snapshot.cost.daily_total,
                        utilization * 100.0,
                        snapshot.cost.daily_budget
                    ),
                    utilization,
                    threshold,
                    at,
                )
                .with_context("daily_total", json!(snapshot.cost.daily_total))
                .with_context("daily_budget", json!(snapshot.cost.daily_budget)),
            );
        }

        let cache = &snapshot.cache;
        if cache.lookups >= cfg.min_samples_for_rates && cache.hit_rate < cfg.cache_hit_rate_min {
            alerts.push(
                Alert::new(
                    AlertLevel::Warning,
                    AlertType::CacheHitRate,
                    format!("cache hit rate {:.1}% is below target", cache.hit_rate * 100.0),
                    cache.hit_rate,
                    cfg.cache_hit_rate_min,
                    at,
                )
                .with_context("lookups", json!(cache.lookups)),
            );
        }

        let p95 = snapshot.performance.overall.p95();
        if snapshot.performance.overall.samples > 0 && p95 > cfg.latency_p95_max {
            alerts.push(Alert::new(
                AlertLevel::Warning,
                AlertType::LatencyP95,
                format!("p95 latency {}ms exceeds limit", p95.as_millis()),
                p95.as_secs_f64(),
                cfg.latency_p95_max.as_secs_f64(),
                at,
            ));
        }

        if let Some(avg) = snapshot.quality.average_similarity {
            let quality_level = if avg < cfg.similarity_critical {
                Some((AlertLevel::Critical, cfg.similarity_critical))
            } else if avg < cfg.similarity_warning {
                Some((AlertLevel::Warning, cfg.similarity_warning))
            } else {
                None
            };
            if let Some((level, threshold)) = quality_level {
                alerts.push(
                    Alert::new(
                        level,
                        AlertType::QualityDegradation,
                        format!("average embedding similarity {avg:.3} below threshold"),
                        avg,
                        threshold,
                        at,
                    )
                    .with_context("samples", json!(snapshot.quality.samples)),
                );
            }
        }

        let errors = &snapshot.errors;
        if errors.attempts >= cfg.min_samples_for_rates && errors.rate > cfg.error_rate_max {
            alerts.push(
                Alert::new(
                    AlertLevel::Error,
                    AlertType::ErrorRate,
                    format!("error rate {:.1}% exceeds limit", errors.rate * 100.0),
                    errors.rate,
                    cfg.error_rate_max,
                    at,
                )
                .with_context("errors", json!(errors.total)),
            );
        }

        let open: Vec<&'static str> = snapshot
            .health
            .open_circuits()
            .map(|p| p.as_str())
            .collect();
        if !open.is_empty() {
            alerts.push(
                Alert::new(
                    AlertLevel::Error,
                    AlertType::CircuitBreakerOpen,
                    format!("circuit breaker open for {}", open.join(", ")),
                    open.len() as f64,
                    0.0,
                    at,
                )
                .with_context("providers", json!(open)),
            );
        }

        alerts
    }

    /// Evaluate, drop anything still cooling down, record and dispatch the rest.
    /// Returns the alerts that fired.
    pub async fn check(&self, snapshot: &MetricsSnapshot) -> Vec<Alert> {
        let now = Utc::now();
        let fired = self.admit(self.evaluate(snapshot), now);
        if fired.is_empty() {
            return fired;
        }

        let handlers: Vec<Arc<dyn AlertHandler>> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for alert in &fired {
            for handler in &handlers {
                if let Err(e) = handler.handle(alert).await {
                    warn!(
                        handler = handler.name(),
                        alert_type = %alert.alert_type,
                        error = %e,
                        "alert handler failed"
                    );
                }
            }
        }
        fired
    }

    fn admit(&self, candidates: Vec<Alert>, now: DateTime<Utc>) -> Vec<Alert> {
        let cooldown = chrono::Duration::from_std(self.config.cooldown)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let mut state = self.lock_state();
        self.prune(&mut state, now);

        let mut fired = Vec::new();
        for alert in candidates {
            let key = (alert.alert_type, alert.level);
            let cooling = state
                .last_fired
                .get(&key)
                .is_some_and(|last| now.signed_duration_since(*last) < cooldown);
            if cooling {
                debug!(alert_type = %alert.alert_type, level = %alert.level, "alert suppressed by cooldown");
                continue;
            }
            state.last_fired.insert(key, now);
            state.history.push_back(alert.clone());
            fired.push(alert);
        }
        fired
    }

    fn prune(&self, state: &mut AlertState, now: DateTime<Utc>) {
        let retention = chrono::Duration::from_std(self.config.history_retention)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        while state
            .history
            .front()
            .is_some_and(|a| now.signed_duration_since(a.timestamp) > retention)
        {
            state.history.pop_front();
        }
    }

    /// Alerts fired inside the retention window, oldest first.
    pub fn history(&self) -> Vec<Alert> {
        let mut state = self.lock_state();
        self.prune(&mut state, Utc::now());
        state.history.iter().cloned().collect()
    }

    pub fn summary(&self) -> AlertSummary {
        let history = self.history();
        let mut by_level = BTreeMap::new();
        let mut by_type = BTreeMap::new();
        for alert in &history {
            *by_level.entry(alert.level).or_insert(0) += 1;
            *by_type.entry(alert.alert_type).or_insert(0) += 1;
        }
        AlertSummary {
            window_secs: self.config.history_retention.as_secs(),
            total: history.len(),
            by_level,
            by_type,
            latest: history.last().cloned(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, AlertState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::AlertError;
    use crate::monitor::{Monitor, MonitorConfig};
    use async_trait::async_trait;
    use provider::{CircuitState, EmbeddingError, ProviderKind};

    #[derive(Default)]
    struct Collecting {
        seen: Mutex<Vec<Alert>>,
    }

    #[async_trait]
    impl AlertHandler for Collecting {
        fn name(&self) -> &str {
            "collecting"
        }

        async fn handle(&self, alert: &Alert) -> Result<(), AlertError> {
            self.seen.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl AlertHandler for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn handle(&self, _: &Alert) -> Result<(), AlertError> {
            Err(AlertError::Dispatch("nope".into()))
        }
    }

    fn monitor_with_spend(spend: f64) -> Monitor {
        let monitor = Monitor::new(MonitorConfig {
            daily_budget_usd: 10.0,
            ..MonitorConfig::default()
        });
        monitor.record_embedding(ProviderKind::Remote, Duration::from_millis(50), 1000, spend, 1);
        monitor
    }

    #[tokio::test]
    async fn budget_at_96_percent_fires_one_critical_then_cools_down() {
        let monitor = monitor_with_spend(9.6);
        let manager = AlertManager::new(AlertConfig::default());
        let collector = Arc::new(Collecting::default());
        manager.add_handler(collector.clone());

        let fired = manager.check(&monitor.snapshot()).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].level, AlertLevel::Critical);
        assert_eq!(fired[0].alert_type, AlertType::BudgetUtilization);
        assert_eq!(fired[0].threshold, 0.95);

        let again = manager.check(&monitor.snapshot()).await;
        assert!(again.is_empty());
        assert_eq!(collector.seen.lock().unwrap().len(), 1);
        assert_eq!(manager.summary().total, 1);
    }

    #[test]
    fn budget_warning_band() {
        let manager = AlertManager::new(AlertConfig::default());
        let alerts = manager.evaluate(&monitor_with_spend(8.5).snapshot());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Warning);
        assert!(manager.evaluate(&monitor_with_spend(7.0).snapshot()).is_empty());
    }

    #[tokio::test]
    async fn zero_cooldown_fires_every_time() {
        let monitor = monitor_with_spend(9.6);
        let manager = AlertManager::new(AlertConfig {
            cooldown: Duration::ZERO,
            ..AlertConfig::default()
        });
        assert_eq!(manager.check(&monitor.snapshot()).await.len(), 1);
        assert_eq!(manager.check(&monitor.snapshot()).await.len(), 1);
        assert_eq!(manager.history().len(), 2);
    }

    #[test]
    fn rate_checks_wait_for_enough_samples() {
        let monitor = Monitor::default();
        for _ in 0..5 {
            monitor.record_cache_miss();
            monitor.record_error(ProviderKind::Remote, &EmbeddingError::Transient("x".into()));
        }
        let manager = AlertManager::new(AlertConfig::default());
        assert!(manager.evaluate(&monitor.snapshot()).is_empty());

        for _ in 0..20 {
            monitor.record_cache_miss();
            monitor.record_error(ProviderKind::Remote, &EmbeddingError::Transient("x".into()));
        }
        let types: Vec<AlertType> = manager
            .evaluate(&monitor.snapshot())
            .into_iter()
            .map(|a| a.alert_type)
            .collect();
        assert!(types.contains(&AlertType::CacheHitRate));
        assert!(types.contains(&AlertType::ErrorRate));
    }

    #[test]
    fn latency_quality_and_circuit_checks() {
        let monitor = Monitor::default();
        monitor.record_embedding(ProviderKind::Remote, Duration::from_secs(3), 10, 0.0, 1);
        monitor.record_quality(0.85);
        monitor.record_circuit_state(ProviderKind::Remote, CircuitState::Open);

        let alerts = AlertManager::new(AlertConfig::default()).evaluate(&monitor.snapshot());
        let find = |t: AlertType| alerts.iter().find(|a| a.alert_type == t).cloned();
        assert_eq!(find(AlertType::LatencyP95).map(|a| a.level), Some(AlertLevel::Warning));
        assert_eq!(
            find(AlertType::QualityDegradation).map(|a| a.level),
            Some(AlertLevel::Critical)
        );
        let circuit = find(AlertType::CircuitBreakerOpen).expect("circuit alert");
        assert_eq!(circuit.level, AlertLevel::Error);
        assert_eq!(circuit.context["providers"], json!(["remote"]));
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_others() {
        let manager = AlertManager::new(AlertConfig::default());
        let collector = Arc::new(Collecting::default());
        manager.add_handler(Arc::new(Failing));
        manager.add_handler(collector.clone());
        assert_eq!(manager.handler_count(), 2);

        let fired = manager.check(&monitor_with_spend(9.9).snapshot()).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(collector.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn summary_counts_by_level_and_type() {
        let manager = AlertManager::new(AlertConfig::default());
        let monitor = monitor_with_spend(9.6);
        monitor.record_circuit_state(ProviderKind::Remote, CircuitState::Open);
        let fired = manager.admit(manager.evaluate(&monitor.snapshot()), Utc::now());
        assert_eq!(fired.len(), 2);

        let summary = manager.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.by_level.get(&AlertLevel::Critical), Some(&1));
        assert_eq!(summary.by_level.get(&AlertLevel::Error), Some(&1));
        assert_eq!(summary.by_type.get(&AlertType::CircuitBreakerOpen), Some(&1));
        assert_eq!(summary.window_secs, 86_400);
    }

    #[test]
    fn config_validation() {
        assert!(AlertConfig::default().validate().is_ok());
        let bad = AlertConfig {
            budget_warning: 0.99,
            budget_critical: 0.9,
            ..AlertConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
