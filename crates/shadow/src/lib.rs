//! Shadow comparison between a legacy embedding path and a candidate one.
//!
//! [`ShadowComparator::run`] serves the caller from the legacy [`Embedder`]
//! and, for a sampled share of calls, replays the same texts through the
//! candidate on a detached task. Vectors are compared per text with
//! [`compare_vectors`]; latency and cost deltas accumulate into
//! [`ShadowStats`], which backs a [`MigrationRecommendation`].
//!
//! Nothing on the candidate path can fail or delay the legacy response.

mod compare;

pub use compare::{compare_vectors, VectorComparison};

use async_trait::async_trait;
use monitor::Monitor;
use provider::{EmbeddingError, EmbeddingResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Anything that turns texts into embeddings, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingResult>, EmbeddingError>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Share of calls replayed through the candidate, 0..=1.
    pub sample_rate: f64,
    /// Below this a comparison counts as degraded.
    pub similarity_threshold: f64,
    /// Comparisons needed before a recommendation other than `Insufficient`.
    pub min_comparisons: u64,
    /// Highest tolerated share of degraded comparisons for `Proceed`.
    pub max_degradation_rate: f64,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            sample_rate: 1.0,
            similarity_threshold: 0.95,
            min_comparisons: 100,
            max_degradation_rate: 0.05,
        }
    }
}

impl ShadowConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(format!("sample_rate must be within 0..=1, got {}", self.sample_rate));
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err("similarity_threshold must be within -1..=1".into());
        }
        if !(0.0..=1.0).contains(&self.max_degradation_rate) {
            return Err("max_degradation_rate must be within 0..=1".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationRecommendation {
    /// Candidate matches legacy closely enough to switch.
    Proceed,
    /// Enough data, but quality is not there yet.
    Hold,
    /// Not enough comparisons to decide.
    Insufficient,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowStats {
    pub comparisons: u64,
    pub failures: u64,
    /// Calls not replayed because of sampling.
    pub skipped: u64,
    pub texts_compared: u64,
    pub dimension_mismatches: u64,
    pub average_similarity: Option<f64>,
    pub min_similarity: Option<f64>,
    pub degradation_rate: f64,
    pub improvement_rate: f64,
    /// Legacy cost minus candidate cost, summed, USD.
    pub estimated_savings_usd: f64,
    /// Candidate minus legacy wall time, averaged, milliseconds.
    pub average_latency_delta_ms: f64,
    pub similarity_threshold: f64,
    pub min_comparisons: u64,
    pub max_degradation_rate: f64,
}

impl ShadowStats {
    pub fn recommendation(&self) -> MigrationRecommendation {
        if self.comparisons < self.min_comparisons {
            return MigrationRecommendation::Insufficient;
        }
        match self.average_similarity {
            Some(avg)
                if avg >= self.similarity_threshold
                    && self.degradation_rate <= self.max_degradation_rate =>
            {
                MigrationRecommendation::Proceed
            }
            Some(_) => MigrationRecommendation::Hold,
            None => MigrationRecommendation::Insufficient,
        }
    }
}

#[derive(Debug, Default)]
struct Aggregates {
    comparisons: u64,
    failures: u64,
    skipped: u64,
    texts_compared: u64,
    dimension_mismatches: u64,
    similarity_sum: f64,
    min_similarity: Option<f64>,
    degraded: u64,
    improved: u64,
    savings: f64,
    latency_delta_ms_sum: f64,
}

struct Observed {
    results: Vec<EmbeddingResult>,
    elapsed: Duration,
}

fn total_cost(results: &[EmbeddingResult]) -> f64 {
    results.iter().filter_map(|r| r.cost).sum()
}

pub struct ShadowComparator {
    config: ShadowConfig,
    aggregates: Arc<Mutex<Aggregates>>,
    monitor: Option<Arc<Monitor>>,
    pending: Arc<AtomicUsize>,
}

impl ShadowComparator {
    pub fn new(config: ShadowConfig) -> Self {
        Self {
            config,
            aggregates: Arc::new(Mutex::new(Aggregates::default())),
            monitor: None,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Similarities are also reported to `monitor` as quality samples.
    pub fn with_monitor(mut self, monitor: Arc<Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn config(&self) -> &ShadowConfig {
        &self.config
    }

    /// Serve `texts` from `legacy`; maybe replay them through `candidate` in the
    /// background. The return value is exactly what `legacy` produced.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn run(
        &self,
        texts: &[String],
        legacy: Arc<dyn Embedder>,
        candidate: Arc<dyn Embedder>,
    ) -> Result<Vec<EmbeddingResult>, EmbeddingError> {
        let started = Instant::now();
        let legacy_results = legacy.embed(texts).await?;
        let legacy_elapsed = started.elapsed();

        if !self.sampled() {
            lock(&self.aggregates).skipped += 1;
            return Ok(legacy_results);
        }

        let observed = Observed {
            results: legacy_results.clone(),
            elapsed: legacy_elapsed,
        };
        let texts = texts.to_vec();
        let aggregates = Arc::clone(&self.aggregates);
        let monitor = self.monitor.clone();
        let threshold = self.config.similarity_threshold;
        let pending = Arc::clone(&self.pending);

        let guard = PendingGuard::enter(pending);
        tokio::spawn(async move {
            let _guard = guard;
            let started = Instant::now();
            let outcome = candidate.embed(&texts).await;
            let candidate_elapsed = started.elapsed();
            match outcome {
                Ok(results) => record_comparison(
                    &aggregates,
                    monitor.as_deref(),
                    threshold,
                    &observed,
                    Observed {
                        results,
                        elapsed: candidate_elapsed,
                    },
                ),
                Err(e) => {
                    warn!(error = %e, texts = texts.len(), "shadow candidate failed");
                    lock(&aggregates).failures += 1;
                }
            }
        });

        Ok(legacy_results)
    }

    /// Background comparisons still running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait up to `timeout` for in-flight comparisons to finish. Returns `true`
    /// when none are left.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }

    pub fn stats(&self) -> ShadowStats {
        let agg = lock(&self.aggregates);
        let ratio = |n: u64, d: u64| if d == 0 { 0.0 } else { n as f64 / d as f64 };
        ShadowStats {
            comparisons: agg.comparisons,
            failures: agg.failures,
            skipped: agg.skipped,
            texts_compared: agg.texts_compared,
            dimension_mismatches: agg.dimension_mismatches,
            average_similarity: (agg.comparisons > 0)
                .then(|| agg.similarity_sum / agg.comparisons as f64),
            min_similarity: agg.min_similarity,
            degradation_rate: ratio(agg.degraded, agg.comparisons),
            improvement_rate: ratio(agg.improved, agg.comparisons),
            estimated_savings_usd: agg.savings,
            average_latency_delta_ms: if agg.comparisons == 0 {
                0.0
            } else {
                agg.latency_delta_ms_sum / agg.comparisons as f64
            },
            similarity_threshold: self.config.similarity_threshold,
            min_comparisons: self.config.min_comparisons,
            max_degradation_rate: self.config.max_degradation_rate,
        }
    }

    pub fn recommendation(&self) -> MigrationRecommendation {
        self.stats().recommendation()
    }

    pub fn reset(&self) {
        *lock(&self.aggregates) = Aggregates::default();
    }

    fn sampled(&self) -> bool {
        let rate = self.config.sample_rate;
        rate >= 1.0 || (rate > 0.0 && fastrand::f64() < rate)
    }
}

fn record_comparison(
    aggregates: &Mutex<Aggregates>,
    monitor: Option<&Monitor>,
    threshold: f64,
    legacy: &Observed,
    candidate: Observed,
) {
    if legacy.results.len() != candidate.results.len() {
        warn!(
            legacy = legacy.results.len(),
            candidate = candidate.results.len(),
            "shadow result count mismatch"
        );
        lock(aggregates).failures += 1;
        return;
    }
    if legacy.results.is_empty() {
        return;
    }

    let comparisons: Vec<VectorComparison> = legacy
        .results
        .iter()
        .zip(&candidate.results)
        .map(|(l, c)| compare_vectors(&l.vector, &c.vector))
        .collect();
    let similarity =
        comparisons.iter().map(|c| c.similarity).sum::<f64>() / comparisons.len() as f64;
    let mismatches = comparisons.iter().filter(|c| !c.dimension_match).count() as u64;

    let legacy_cost = total_cost(&legacy.results);
    let candidate_cost = total_cost(&candidate.results);
    let latency_delta_ms =
        (candidate.elapsed.as_secs_f64() - legacy.elapsed.as_secs_f64()) * 1000.0;

    {
        let mut agg = lock(aggregates);
        agg.comparisons += 1;
        agg.texts_compared += comparisons.len() as u64;
        agg.dimension_mismatches += mismatches;
        agg.similarity_sum += similarity;
        agg.min_similarity = Some(agg.min_similarity.map_or(similarity, |m| m.min(similarity)));
        if similarity < threshold {
            agg.degraded += 1;
        } else if candidate_cost < legacy_cost {
            agg.improved += 1;
        }
        agg.savings += legacy_cost - candidate_cost;
        agg.latency_delta_ms_sum += latency_delta_ms;
    }

    if let Some(monitor) = monitor {
        monitor.record_quality(similarity);
    }
    debug!(
        similarity,
        mismatches,
        latency_delta_ms,
        cost_delta = legacy_cost - candidate_cost,
        "shadow comparison recorded"
    );
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counts one in-flight comparison; released on drop, so a panicking
/// candidate still leaves the count balanced.
struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
