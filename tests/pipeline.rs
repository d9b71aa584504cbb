mod common;

use common::{FakeProvider, StubMode, stub_api, test_config, texts};
use hybrid_embed::{
    BackendKind, CacheConfig, EmbedOptions, EmbeddingContext, EmbeddingError, EmbeddingProvider,
    HealthStatus, HybridConfig, HybridEmbeddingService, HybridError, ProviderKind, ReasonCode,
};
use std::sync::Arc;
use std::time::Duration;

async fn service_with(
    config: HybridConfig,
    local: &Arc<FakeProvider>,
    remote: Option<&Arc<FakeProvider>>,
) -> HybridEmbeddingService {
    let local: Arc<dyn EmbeddingProvider> = local.clone();
    let remote = remote.map(|r| r.clone() as Arc<dyn EmbeddingProvider>);
    HybridEmbeddingService::with_providers(config, local, remote)
        .await
        .unwrap()
}

#[tokio::test]
async fn empty_input_is_empty_output_and_blank_text_is_rejected() {
    let local = Arc::new(FakeProvider::local());
    let service = service_with(test_config(), &local, None).await;

    let results = service.embed(&[], &EmbedOptions::default()).await.unwrap();
    assert!(results.is_empty());

    let err = service
        .embed(&texts(&["budget", "   "]), &EmbedOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HybridError::Provider(EmbeddingError::InvalidInput(_))
    ));
    assert_eq!(local.calls(), 0);
}

#[tokio::test]
async fn partial_hits_keep_input_order() {
    let local = Arc::new(FakeProvider::local());
    let service = service_with(test_config(), &local, None).await;
    let options = EmbedOptions::default();

    let first = service.embed(&texts(&["a", "b"]), &options).await.unwrap();
    let second = service
        .embed(&texts(&["b", "c", "a"]), &options)
        .await
        .unwrap();

    let hits: Vec<bool> = second.iter().map(|r| r.cache_hit).collect();
    assert_eq!(hits, vec![true, false, true]);
    assert_eq!(second[0].vector, first[1].vector);
    assert_eq!(second[2].vector, first[0].vector);
    assert_eq!(second[1].vector, common::fake_vector("c", 384));
    // Only the miss reached the provider on the second call.
    assert_eq!(local.texts_embedded(), 3);
}

#[tokio::test]
async fn force_fresh_regenerates_and_still_populates() {
    let local = Arc::new(FakeProvider::local());
    let service = service_with(test_config(), &local, None).await;

    service.embed_one("net worth", &EmbedOptions::default()).await.unwrap();
    let fresh = service
        .embed_one("net worth", &EmbedOptions::new().fresh())
        .await
        .unwrap();
    assert!(!fresh.cache_hit);
    assert_eq!(local.calls(), 2);

    let cached = service.embed_one("net worth", &EmbedOptions::default()).await.unwrap();
    assert!(cached.cache_hit);
    assert_eq!(local.calls(), 2);
}

#[tokio::test]
async fn caching_disabled_always_generates() {
    let mut config = test_config();
    config.caching = false;
    let local = Arc::new(FakeProvider::local());
    let service = service_with(config, &local, None).await;

    for _ in 0..2 {
        let result = service.embed_one("inflation", &EmbedOptions::default()).await.unwrap();
        assert!(!result.cache_hit);
    }
    assert_eq!(local.calls(), 2);
    assert!(service.get_metrics().await.cache.is_none());
    assert!(matches!(
        service.warm_up().await,
        Err(HybridError::Disabled("caching"))
    ));
}

#[tokio::test]
async fn quality_sensitive_goes_remote_and_tracks_spend() {
    let local = Arc::new(FakeProvider::local());
    let remote = Arc::new(FakeProvider::remote());
    let service = service_with(test_config(), &local, Some(&remote)).await;
    let options = EmbedOptions::new().with_context(EmbeddingContext::QualitySensitive);

    let result = service
        .embed_one("compare roth and traditional accounts", &options)
        .await
        .unwrap();
    assert_eq!(result.provider, ProviderKind::Remote);
    assert_eq!(result.dimension, 1536);
    assert!(result.cost.unwrap() > 0.0);

    let snapshot = service.monitor().snapshot();
    assert!(snapshot.cost.daily_remote > 0.0);
    assert_eq!(snapshot.requests.remote, 1);
    assert_eq!(
        snapshot
            .routing
            .by_reason
            .get(ReasonCode::QualitySensitive.as_str()),
        Some(&1)
    );
}

#[tokio::test]
async fn remote_failure_falls_back_to_local() {
    let local = Arc::new(FakeProvider::local());
    let remote = Arc::new(FakeProvider::remote().failing(EmbeddingError::Http {
        status: 503,
        body: "overloaded".into(),
    }));
    let service = service_with(test_config(), &local, Some(&remote)).await;
    let options = EmbedOptions::new().with_context(EmbeddingContext::QualitySensitive);

    let result = service.embed_one("mortgage rates", &options).await.unwrap();
    assert_eq!(result.provider, ProviderKind::Local);
    assert_eq!(remote.calls(), 1);

    let snapshot = service.monitor().snapshot();
    assert_eq!(snapshot.errors.remote, 1);
    assert_eq!(snapshot.routing.decisions, 1);
    assert_eq!(snapshot.routing.matched, 0);

    // The fallback result is cached under the local key.
    let again = service.embed_one("mortgage rates", &options).await.unwrap();
    assert_eq!(remote.calls(), 2);
    assert!(again.cache_hit);
}

#[tokio::test]
async fn both_providers_failing_returns_last_error() {
    let local = Arc::new(FakeProvider::local().failing(EmbeddingError::Inference("oom".into())));
    let remote = Arc::new(FakeProvider::remote().failing(EmbeddingError::Timeout(
        Duration::from_secs(30),
    )));
    let service = service_with(test_config(), &local, Some(&remote)).await;

    let err = service
        .embed_one("asset allocation", &EmbedOptions::new().prefer(ProviderKind::Remote))
        .await
        .unwrap_err();
    assert_eq!(
        err.as_provider_error(),
        Some(&EmbeddingError::Inference("oom".into()))
    );
}

#[tokio::test]
async fn spend_over_budget_routes_local() {
    let mut config = test_config();
    config.routing_policy.daily_budget_usd = 1.0;
    let local = Arc::new(FakeProvider::local());
    let remote = Arc::new(FakeProvider::remote());
    let service = service_with(config, &local, Some(&remote)).await;

    service.monitor().record_embedding(
        ProviderKind::Remote,
        Duration::from_millis(100),
        50_000,
        1.0,
        10,
    );
    let options = EmbedOptions::new().with_context(EmbeddingContext::QualitySensitive);
    let result = service.embed_one("capital gains", &options).await.unwrap();

    assert_eq!(result.provider, ProviderKind::Local);
    assert_eq!(remote.calls(), 0);
    let routing = service.monitor().snapshot().routing;
    assert_eq!(routing.by_reason.get("budget_exceeded"), Some(&1));
}

#[tokio::test]
async fn routing_disabled_uses_local_unless_remote_requested() {
    let mut config = test_config();
    config.routing = false;
    let local = Arc::new(FakeProvider::local());
    let remote = Arc::new(FakeProvider::remote());
    let service = service_with(config, &local, Some(&remote)).await;

    let quality = EmbedOptions::new().with_context(EmbeddingContext::QualitySensitive);
    let result = service.embed_one("dividends", &quality).await.unwrap();
    assert_eq!(result.provider, ProviderKind::Local);

    let explicit = EmbedOptions::new().prefer(ProviderKind::Remote);
    let result = service.embed_one("dividends", &explicit).await.unwrap();
    assert_eq!(result.provider, ProviderKind::Remote);
    assert_eq!(remote.calls(), 1);
}

#[tokio::test]
async fn disabled_pipeline_goes_straight_to_local() {
    let mut config = test_config();
    config.enabled = false;
    let local = Arc::new(FakeProvider::local());
    let remote = Arc::new(FakeProvider::remote());
    let service = service_with(config, &local, Some(&remote)).await;

    let options = EmbedOptions::new().prefer(ProviderKind::Remote);
    for _ in 0..2 {
        let result = service.embed_one("bonds", &options).await.unwrap();
        assert_eq!(result.provider, ProviderKind::Local);
        assert!(!result.cache_hit);
    }
    assert!(!service.remote_available());
    assert_eq!(remote.calls(), 0);
    assert_eq!(service.monitor().snapshot().requests.total, 0);

    service.start_background_tasks();
    assert!(!service.background_tasks_running());
}

#[tokio::test]
async fn remote_init_failure_runs_local_only() {
    let local = Arc::new(FakeProvider::local());
    let remote = Arc::new(FakeProvider::remote().failing_init(
        EmbeddingError::ProviderUnavailable("no API key".into()),
    ));
    let service = service_with(test_config(), &local, Some(&remote)).await;

    assert!(!service.remote_available());
    let options = EmbedOptions::new().prefer(ProviderKind::Remote);
    let result = service.embed_one("student loan", &options).await.unwrap();
    assert_eq!(result.provider, ProviderKind::Local);

    let health = service.health_check().await;
    assert_eq!(health.status, HealthStatus::Degraded);
    assert!(health.remote.is_none());
}

#[tokio::test]
async fn local_init_failure_is_fatal() {
    let local = Arc::new(FakeProvider::local().failing_init(EmbeddingError::ProviderUnavailable(
        "model artifact not found".into(),
    )));
    let result =
        HybridEmbeddingService::with_providers(test_config(), local, None).await;
    assert!(matches!(
        result,
        Err(HybridError::Provider(EmbeddingError::ProviderUnavailable(_)))
    ));
}

#[tokio::test]
async fn unhealthy_remote_is_avoided_after_health_check() {
    let local = Arc::new(FakeProvider::local());
    let remote = Arc::new(FakeProvider::remote().failing(EmbeddingError::Transient(
        "connection refused".into(),
    )));
    let service = service_with(test_config(), &local, Some(&remote)).await;

    let health = service.health_check().await;
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(
        service.monitor().snapshot().health.remote.unwrap().status,
        HealthStatus::Unhealthy
    );

    let options = EmbedOptions::new().with_context(EmbeddingContext::QualitySensitive);
    let result = service.embed_one("tax bracket", &options).await.unwrap();
    assert_eq!(result.provider, ProviderKind::Local);
    assert_eq!(remote.calls(), 0);

    remote.recover();
    assert_eq!(service.health_check().await.status, HealthStatus::Healthy);
    let result = service.embed_one("tax bracket", &options).await.unwrap();
    assert_eq!(result.provider, ProviderKind::Remote);
}

#[tokio::test]
async fn warm_up_fills_the_cache() {
    let mut config = test_config();
    config.cache.warm_up = true;
    let local = Arc::new(FakeProvider::local());
    let service = service_with(config, &local, None).await;
    assert_eq!(
        local.texts_embedded(),
        hybrid_embed::warmup::FINANCIAL_VOCABULARY.len()
    );

    let result = service.embed_one("emergency fund", &EmbedOptions::default()).await.unwrap();
    assert!(result.cache_hit);
}

#[tokio::test]
async fn redb_cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.remote.enabled = false;
    config.cache = CacheConfig {
        backend: BackendKind::Redb,
        path: dir.path().join("embeddings.redb"),
        ..CacheConfig::default()
    };

    let first = {
        let service = HybridEmbeddingService::new(config.clone()).await.unwrap();
        service.embed_one("rebalancing", &EmbedOptions::default()).await.unwrap()
    };

    let service = HybridEmbeddingService::new(config).await.unwrap();
    let second = service.embed_one("rebalancing", &EmbedOptions::default()).await.unwrap();
    assert!(second.cache_hit);
    assert_eq!(second.vector, first.vector);
    assert_eq!(service.monitor().snapshot().cache.l2_hits, 1);
}

#[tokio::test]
async fn remote_http_results_are_served_from_cache() {
    let api = stub_api(StubMode::Embed { dimension: 8 }).await;
    let mut config = test_config();
    config.remote.base_url = api.base_url.clone();
    config.remote.dimension = 8;
    config.remote.cost_per_1k_tokens = 0.01;
    let service = HybridEmbeddingService::new(config).await.unwrap();
    let options = EmbedOptions::new().with_context(EmbeddingContext::QualitySensitive);

    let first = service.embed(&texts(&["credit score", "debt snowball"]), &options).await.unwrap();
    assert!(first.iter().all(|r| r.provider == ProviderKind::Remote && r.dimension == 8));
    let spent: f64 = first.iter().filter_map(|r| r.cost).sum();
    assert!((spent - 0.02).abs() < 1e-9);
    assert!((service.monitor().daily_spend() - 0.02).abs() < 1e-9);

    let second = service.embed(&texts(&["debt snowball"]), &options).await.unwrap();
    assert!(second[0].cache_hit);
    assert_eq!(api.connections(), 1);
}
