//! Metrics aggregation and alerting for the hybrid embedding service.
//!
//! [`Monitor`] collects latency samples, spend, cache, routing, error, quality
//! and health signals and mirrors them to the `metrics` facade. Its
//! [`MetricsSnapshot`] feeds the [`AlertManager`], which applies thresholds,
//! suppresses repeats within a cooldown and dispatches to [`AlertHandler`]s.
//!
//! ```no_run
//! use monitor::{spawn_alert_loop, AlertConfig, AlertManager, LogAlertHandler, Monitor};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() {
//! let monitor = Arc::new(Monitor::default());
//! let alerts = Arc::new(AlertManager::new(AlertConfig::default()));
//! alerts.add_handler(Arc::new(LogAlertHandler));
//! let task = spawn_alert_loop(monitor, alerts, Duration::from_secs(60));
//! // ...
//! task.abort();
//! # }
//! ```

mod alerts;
mod handlers;
mod monitor;
mod samples;

pub use alerts::{Alert, AlertConfig, AlertLevel, AlertManager, AlertSummary, AlertType};
pub use handlers::{AlertError, AlertHandler, LogAlertHandler, WebhookAlertHandler};
pub use monitor::{
    CacheSnapshot, CostSnapshot, ErrorRecord, ErrorSnapshot, HealthSnapshot, MetricsSnapshot,
    Monitor, MonitorConfig, PerformanceSnapshot, QualitySnapshot, RequestCounts, RoutingSnapshot,
};
pub use samples::LatencySummary;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Poll `monitor` every `interval` and run the alert checks. The first check
/// happens one interval after the call. Abort the handle to stop.
pub fn spawn_alert_loop(
    monitor: Arc<Monitor>,
    manager: Arc<AlertManager>,
    interval: Duration,
) -> JoinHandle<()> {
    spawn_alert_loop_with_probe(monitor, manager, interval, || async {})
}

/// Like [`spawn_alert_loop`], but awaits `probe` before every check so
/// health and circuit snapshots are fresh when the thresholds run.
pub fn spawn_alert_loop_with_probe<F, Fut>(
    monitor: Arc<Monitor>,
    manager: Arc<AlertManager>,
    interval: Duration,
    probe: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let period = interval.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            probe().await;
            let snapshot = monitor.snapshot();
            let fired = manager.check(&snapshot).await;
            if !fired.is_empty() {
                debug!(count = fired.len(), "alerts fired");
            }
        }
    })
}
