//! # Provider router (`router`)
//!
//! Chooses between the local and remote embedding providers for each request.
//! [`Router::route`] is pure: it reads a [`RouteRequest`] and a snapshot of
//! live [`RoutingSignals`] and returns a [`RoutingDecision`] carrying a
//! [`ReasonCode`] and an optional fallback.
//!
//! Rules, highest priority first:
//!
//! 1. Text matching a [`PiiDetector`] pattern is embedded locally, no fallback.
//! 2. An explicit caller preference is honored (remote falls back to local
//!    when remote is disabled).
//! 3. Remote disabled, circuit open or unhealthy routes local.
//! 4. Projected spend over the daily budget or the per-request ceiling routes local.
//! 5. Batches above `large_batch_threshold` route local with remote fallback.
//! 6. Otherwise the [`EmbeddingContext`] decides.
//!
//! ```
//! use router::{EmbeddingContext, RouteRequest, Router, RoutingPolicy, RoutingSignals};
//! use provider::ProviderKind;
//!
//! let router = Router::new(RoutingPolicy::default(), 0.00002).unwrap();
//! let texts = vec!["My SSN is 123-45-6789".to_string()];
//! let decision = router.route(
//!     &RouteRequest::new(&texts).with_context(EmbeddingContext::QualitySensitive),
//!     &RoutingSignals::default(),
//! );
//! assert_eq!(decision.provider, ProviderKind::Local);
//! ```

mod config;
mod engine;
pub mod pii;
mod types;

pub use config::{RoutingConfigError, RoutingPolicy};
pub use engine::Router;
pub use pii::{PiiDetector, PiiKind, PiiMatch};
pub use types::{EmbeddingContext, ReasonCode, RouteRequest, RoutingDecision, RoutingSignals};
