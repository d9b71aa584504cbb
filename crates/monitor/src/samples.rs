use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Fixed-capacity ring of the most recent observations.
#[derive(Debug, Clone)]
pub(crate) struct SampleRing {
    values: VecDeque<f64>,
    capacity: usize,
}

impl SampleRing {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    pub(crate) fn min(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::min)
    }

    /// Nearest-rank percentiles for each `q` in `qs` (0..=1).
    pub(crate) fn percentiles<const N: usize>(&self, qs: [f64; N]) -> [f64; N] {
        let mut sorted: Vec<f64> = self.values.iter().copied().collect();
        if sorted.is_empty() {
            return [0.0; N];
        }
        sorted.sort_by(|a, b| a.total_cmp(b));
        qs.map(|q| {
            let rank = (q.clamp(0.0, 1.0) * sorted.len() as f64).ceil() as usize;
            sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
        })
    }

    pub(crate) fn clear(&mut self) {
        self.values.clear();
    }
}

/// Latency distribution over the sample window, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LatencySummary {
    pub(crate) fn from_ring(ring: &SampleRing) -> Self {
        let [p50_ms, p95_ms, p99_ms] = ring.percentiles([0.50, 0.95, 0.99]);
        Self {
            samples: ring.len(),
            mean_ms: ring.mean().unwrap_or(0.0),
            p50_ms,
            p95_ms,
            p99_ms,
        }
    }

    pub fn p50(&self) -> Duration {
        Duration::from_secs_f64(self.p50_ms.max(0.0) / 1000.0)
    }

    pub fn p95(&self) -> Duration {
        Duration::from_secs_f64(self.p95_ms.max(0.0) / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_keeps_only_the_newest_values() {
        let mut ring = SampleRing::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            ring.push(v);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.mean(), Some(3.0));
        assert_eq!(ring.min(), Some(2.0));
    }

    #[test]
    fn nearest_rank_percentiles() {
        let mut ring = SampleRing::new(1000);
        for v in 1..=100 {
            ring.push(v as f64);
        }
        assert_eq!(ring.percentiles([0.5, 0.95, 0.99, 1.0]), [50.0, 95.0, 99.0, 100.0]);

        let summary = LatencySummary::from_ring(&ring);
        assert_eq!(summary.samples, 100);
        assert_eq!(summary.p95(), Duration::from_millis(95));
    }

    #[test]
    fn empty_ring_reports_zeros() {
        let ring = SampleRing::new(10);
        assert_eq!(ring.percentiles([0.5, 0.95]), [0.0, 0.0]);
        assert_eq!(ring.mean(), None);
        assert_eq!(LatencySummary::from_ring(&ring), LatencySummary::default());
    }
}
