use crate::samples::{LatencySummary, SampleRing};
use cache::CacheTier;
use chrono::{DateTime, NaiveDate, Utc};
use provider::{CircuitState, EmbeddingError, ProviderHealth, ProviderKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Latency and quality samples kept per series.
    pub sample_capacity: usize,
    pub recent_errors: usize,
    /// USD; denominator of budget utilization.
    pub daily_budget_usd: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_capacity: 1000,
            recent_errors: 100,
            daily_budget_usd: 10.0,
        }
    }
}

fn idx(provider: ProviderKind) -> usize {
    match provider {
        ProviderKind::Local => 0,
        ProviderKind::Remote => 1,
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct ProviderCounters {
    requests: AtomicU64,
    texts: AtomicU64,
    errors: AtomicU64,
}

/// Spend for one UTC day; replaced wholesale when the date changes.
#[derive(Debug, Clone)]
struct DailyLedger {
    date: NaiveDate,
    cost: [f64; 2],
    tokens: [u64; 2],
}

impl DailyLedger {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            cost: [0.0; 2],
            tokens: [0; 2],
        }
    }

    fn roll(&mut self, today: NaiveDate) {
        if today != self.date {
            debug!(previous = %self.date, %today, "daily spend reset");
            *self = DailyLedger::new(today);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub provider: ProviderKind,
    pub kind: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

struct Rings {
    overall: SampleRing,
    per_provider: [SampleRing; 2],
    quality: SampleRing,
}

/// Process-wide metrics aggregate. Cheap to call from the request path:
/// counters are atomics and every lock is held for a few instructions.
pub struct Monitor {
    config: MonitorConfig,
    started: Instant,
    counters: [ProviderCounters; 2],
    cache_hits: [AtomicU64; 2],
    cache_misses: AtomicU64,
    routing_decisions: AtomicU64,
    routing_matched: AtomicU64,
    routing_reasons: Mutex<BTreeMap<String, u64>>,
    lifetime_cost: Mutex<[f64; 2]>,
    ledger: Mutex<DailyLedger>,
    rings: Mutex<Rings>,
    recent_errors: Mutex<VecDeque<ErrorRecord>>,
    health: Mutex<[Option<ProviderHealth>; 2]>,
    circuits: Mutex<BTreeMap<ProviderKind, CircuitState>>,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        let cap = config.sample_capacity;
        Self {
            started: Instant::now(),
            counters: Default::default(),
            cache_hits: Default::default(),
            cache_misses: AtomicU64::new(0),
            routing_decisions: AtomicU64::new(0),
            routing_matched: AtomicU64::new(0),
            routing_reasons: Mutex::new(BTreeMap::new()),
            lifetime_cost: Mutex::new([0.0; 2]),
            ledger: Mutex::new(DailyLedger::new(Utc::now().date_naive())),
            rings: Mutex::new(Rings {
                overall: SampleRing::new(cap),
                per_provider: [SampleRing::new(cap), SampleRing::new(cap)],
                quality: SampleRing::new(cap),
            }),
            recent_errors: Mutex::new(VecDeque::with_capacity(config.recent_errors)),
            health: Mutex::new([None, None]),
            circuits: Mutex::new(BTreeMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// One successful provider call covering `texts` inputs.
    pub fn record_embedding(
        &self,
        provider: ProviderKind,
        latency: Duration,
        tokens: u64,
        cost: f64,
        texts: usize,
    ) {
        self.record_embedding_on(Utc::now().date_naive(), provider, latency, tokens, cost, texts);
    }

    fn record_embedding_on(
        &self,
        today: NaiveDate,
        provider: ProviderKind,
        latency: Duration,
        tokens: u64,
        cost: f64,
        texts: usize,
    ) {
        let i = idx(provider);
        self.counters[i].requests.fetch_add(1, Ordering::Relaxed);
        self.counters[i].texts.fetch_add(texts as u64, Ordering::Relaxed);

        let ms = latency.as_secs_f64() * 1000.0;
        {
            let mut rings = lock(&self.rings);
            rings.overall.push(ms);
            rings.per_provider[i].push(ms);
        }

        let cost = if cost.is_finite() { cost.max(0.0) } else { 0.0 };
        {
            let mut ledger = lock(&self.ledger);
            ledger.roll(today);
            ledger.cost[i] += cost;
            ledger.tokens[i] += tokens;
        }
        lock(&self.lifetime_cost)[i] += cost;

        let label = provider.as_str();
        metrics::counter!("embedding_requests_total", "provider" => label).increment(1);
        metrics::histogram!("embedding_latency_seconds", "provider" => label)
            .record(latency.as_secs_f64());
        if cost > 0.0 {
            metrics::gauge!("embedding_cost_usd", "provider" => label).increment(cost);
        }
    }

    pub fn record_cache_hit(&self, tier: CacheTier) {
        let i = match tier {
            CacheTier::L1 => 0,
            CacheTier::L2 => 1,
        };
        self.cache_hits[i].fetch_add(1, Ordering::Relaxed);
        metrics::counter!("embedding_cache_hits_total", "tier" => tier.as_str()).increment(1);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("embedding_cache_misses_total").increment(1);
    }

    /// `decided` is what the router chose; `executed` is what actually served
    /// the request after any fallback.
    pub fn record_routing(&self, decided: ProviderKind, executed: ProviderKind, reason: &str) {
        self.routing_decisions.fetch_add(1, Ordering::Relaxed);
        if decided == executed {
            self.routing_matched.fetch_add(1, Ordering::Relaxed);
        }
        *lock(&self.routing_reasons).entry(reason.to_string()).or_insert(0) += 1;
    }

    pub fn record_error(&self, provider: ProviderKind, error: &EmbeddingError) {
        self.counters[idx(provider)].errors.fetch_add(1, Ordering::Relaxed);
        {
            let mut recent = lock(&self.recent_errors);
            if recent.len() >= self.config.recent_errors.max(1) {
                recent.pop_front();
            }
            recent.push_back(ErrorRecord {
                provider,
                kind: error.kind().to_string(),
                message: error.to_string(),
                at: Utc::now(),
            });
        }
        metrics::counter!(
            "embedding_errors_total",
            "provider" => provider.as_str(),
            "kind" => error.kind()
        )
        .increment(1);
    }

    /// Cosine similarity of a candidate embedding against a reference.
    pub fn record_quality(&self, similarity: f64) {
        if similarity.is_finite() {
            lock(&self.rings).quality.push(similarity);
        }
    }

    pub fn record_health(&self, health: ProviderHealth) {
        let i = idx(health.provider);
        lock(&self.health)[i] = Some(health);
    }

    pub fn record_circuit_state(&self, provider: ProviderKind, state: CircuitState) {
        lock(&self.circuits).insert(provider, state);
    }

    /// Today's spend across providers, after any UTC day rollover.
    pub fn daily_spend(&self) -> f64 {
        let mut ledger = lock(&self.ledger);
        ledger.roll(Utc::now().date_naive());
        ledger.cost.iter().sum()
    }

    /// Median observed latency for `provider`, if it has served anything.
    pub fn latency_estimate(&self, provider: ProviderKind) -> Option<Duration> {
        let rings = lock(&self.rings);
        let ring = &rings.per_provider[idx(provider)];
        if ring.len() == 0 {
            return None;
        }
        Some(LatencySummary::from_ring(ring).p50())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot_on(Utc::now())
    }

    fn snapshot_on(&self, now: DateTime<Utc>) -> MetricsSnapshot {
        let performance = {
            let rings = lock(&self.rings);
            PerformanceSnapshot {
                overall: LatencySummary::from_ring(&rings.overall),
                local: LatencySummary::from_ring(&rings.per_provider[0]),
                remote: LatencySummary::from_ring(&rings.per_provider[1]),
            }
        };
        let quality = {
            let rings = lock(&self.rings);
            QualitySnapshot {
                samples: rings.quality.len(),
                average_similarity: rings.quality.mean(),
                min_similarity: rings.quality.min(),
            }
        };

        let load = |i: usize| {
            (
                self.counters[i].requests.load(Ordering::Relaxed),
                self.counters[i].texts.load(Ordering::Relaxed),
                self.counters[i].errors.load(Ordering::Relaxed),
            )
        };
        let (local_requests, local_texts, local_errors) = load(0);
        let (remote_requests, remote_texts, remote_errors) = load(1);
        let total_requests = local_requests + remote_requests;
        let total_errors = local_errors + remote_errors;
        let attempts = total_requests + total_errors;

        let cost = {
            let mut ledger = lock(&self.ledger);
            ledger.roll(now.date_naive());
            let lifetime = *lock(&self.lifetime_cost);
            let daily_total = ledger.cost[0] + ledger.cost[1];
            let budget = self.config.daily_budget_usd;
            CostSnapshot {
                date: ledger.date,
                daily_local: ledger.cost[0],
                daily_remote: ledger.cost[1],
                daily_total,
                daily_tokens_local: ledger.tokens[0],
                daily_tokens_remote: ledger.tokens[1],
                lifetime_total: lifetime[0] + lifetime[1],
                daily_budget: budget,
                budget_utilization: if budget > 0.0 { daily_total / budget } else { 0.0 },
            }
        };

        let l1 = self.cache_hits[0].load(Ordering::Relaxed);
        let l2 = self.cache_hits[1].load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let lookups = l1 + l2 + misses;
        let ratio = |n: u64, d: u64| if d == 0 { 0.0 } else { n as f64 / d as f64 };

        let decisions = self.routing_decisions.load(Ordering::Relaxed);
        let matched = self.routing_matched.load(Ordering::Relaxed);

        let health = lock(&self.health).clone();

        MetricsSnapshot {
            timestamp: now,
            uptime_secs: self.started.elapsed().as_secs(),
            performance,
            requests: RequestCounts {
                total: total_requests,
                local: local_requests,
                remote: remote_requests,
                texts: local_texts + remote_texts,
            },
            cost,
            cache: CacheSnapshot {
                lookups,
                l1_hits: l1,
                l2_hits: l2,
                misses,
                hit_rate: ratio(l1 + l2, lookups),
                l1_hit_rate: ratio(l1, lookups),
                l2_hit_rate: ratio(l2, lookups),
            },
            routing: RoutingSnapshot {
                decisions,
                matched,
                accuracy: if decisions == 0 { 1.0 } else { ratio(matched, decisions) },
                by_reason: lock(&self.routing_reasons).clone(),
            },
            errors: ErrorSnapshot {
                total: total_errors,
                local: local_errors,
                remote: remote_errors,
                attempts,
                rate: ratio(total_errors, attempts),
                recent: lock(&self.recent_errors).iter().cloned().collect(),
            },
            quality,
            health: HealthSnapshot {
                local: health[0].clone(),
                remote: health[1].clone(),
                circuits: lock(&self.circuits).clone(),
            },
        }
    }

    /// Zero every aggregate. Lifetime counters included.
    pub fn reset(&self) {
        for c in &self.counters {
            c.requests.store(0, Ordering::Relaxed);
            c.texts.store(0, Ordering::Relaxed);
            c.errors.store(0, Ordering::Relaxed);
        }
        for h in &self.cache_hits {
            h.store(0, Ordering::Relaxed);
        }
        self.cache_misses.store(0, Ordering::Relaxed);
        self.routing_decisions.store(0, Ordering::Relaxed);
        self.routing_matched.store(0, Ordering::Relaxed);
        lock(&self.routing_reasons).clear();
        *lock(&self.lifetime_cost) = [0.0; 2];
        *lock(&self.ledger) = DailyLedger::new(Utc::now().date_naive());
        {
            let mut rings = lock(&self.rings);
            rings.overall.clear();
            rings.per_provider.iter_mut().for_each(SampleRing::clear);
            rings.quality.clear();
        }
        lock(&self.recent_errors).clear();
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Monitor::new(MonitorConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
    pub performance: PerformanceSnapshot,
    pub requests: RequestCounts,
    pub cost: CostSnapshot,
    pub cache: CacheSnapshot,
    pub routing: RoutingSnapshot,
    pub errors: ErrorSnapshot,
    pub quality: QualitySnapshot,
    pub health: HealthSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub overall: LatencySummary,
    pub local: LatencySummary,
    pub remote: LatencySummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounts {
    pub total: u64,
    pub local: u64,
    pub remote: u64,
    pub texts: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSnapshot {
    pub date: NaiveDate,
    pub daily_local: f64,
    pub daily_remote: f64,
    pub daily_total: f64,
    pub daily_tokens_local: u64,
    pub daily_tokens_remote: u64,
    pub lifetime_total: f64,
    pub daily_budget: f64,
    /// `daily_total / daily_budget`.
    pub budget_utilization: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub lookups: u64,
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub l1_hit_rate: f64,
    pub l2_hit_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingSnapshot {
    pub decisions: u64,
    pub matched: u64,
    /// Share of requests served by the provider the router chose.
    pub accuracy: f64,
    pub by_reason: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSnapshot {
    pub total: u64,
    pub local: u64,
    pub remote: u64,
    /// Successful calls plus failed ones.
    pub attempts: u64,
    pub rate: f64,
    pub recent: Vec<ErrorRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualitySnapshot {
    pub samples: usize,
    pub average_similarity: Option<f64>,
    pub min_similarity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub local: Option<ProviderHealth>,
    pub remote: Option<ProviderHealth>,
    pub circuits: BTreeMap<ProviderKind, CircuitState>,
}

impl HealthSnapshot {
    pub fn open_circuits(&self) -> impl Iterator<Item = ProviderKind> + '_ {
        self.circuits
            .iter()
            .filter(|(_, state)| **state == CircuitState::Open)
            .map(|(provider, _)| *provider)
    }
}
