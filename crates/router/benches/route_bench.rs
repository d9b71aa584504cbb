use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use router::{EmbeddingContext, PiiDetector, RouteRequest, Router, RoutingPolicy, RoutingSignals};
use std::hint::black_box;

fn corpus(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("Q{} earnings call transcript segment {i}: margins held steady", i % 4 + 1))
        .collect()
}

fn bench_pii_scan(c: &mut Criterion) {
    let detector = PiiDetector::new();
    let clean = "Treasury yields rose after the payrolls report beat consensus expectations";
    let dirty = "Reach the analyst at jane.doe@example.com or 555-867-5309 about the filing";

    let mut group = c.benchmark_group("pii_scan");
    group.bench_function("clean_text", |b| b.iter(|| detector.contains_pii(black_box(clean))));
    group.bench_function("dirty_text", |b| b.iter(|| detector.detect(black_box(dirty))));
    group.finish();
}

fn bench_route(c: &mut Criterion) {
    let router = Router::new(RoutingPolicy::default(), 0.00002).expect("router");
    let signals = RoutingSignals::default();

    let mut group = c.benchmark_group("route");
    for size in [1usize, 32, 256] {
        let texts = corpus(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("quality_{size}"), |b| {
            b.iter(|| {
                let request =
                    RouteRequest::new(&texts).with_context(EmbeddingContext::QualitySensitive);
                black_box(router.route(&request, &signals))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_pii_scan, bench_route);
criterion_main!(benches);
