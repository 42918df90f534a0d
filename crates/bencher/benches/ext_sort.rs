use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use waypoint_web::ext::{ext_fn, ExtHandler, ExtOptions, ExtPoint, ExtRegistry};

fn noop() -> Arc<dyn ExtHandler> {
    Arc::new(ext_fn(|_req, reply| Box::pin(async move { Ok(reply.proceed()) })))
}

/// Builds a registry of `n` callbacks in `n / 4` chained groups, each
/// constrained to run after the previous one. Every add re-sorts the point.
fn register_chained(n: usize) -> ExtRegistry {
    let mut registry = ExtRegistry::default();
    for i in 0..n {
        let group = format!("g{}", i / 4);
        let mut options = ExtOptions::group(group);
        if i >= 4 {
            options = options.after(format!("g{}", i / 4 - 1));
        }
        registry.add(ExtPoint::OnRequest, noop(), options).expect("acyclic constraints");
    }
    registry
}

fn benchmark_ext_sort(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("ext_sort");

    for size in [8usize, 32, 128] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let registry = register_chained(size);
                black_box(registry.sorted_seqs(ExtPoint::OnRequest));
            });
        });
    }

    group.finish();
}

criterion_group!(ext_sort, benchmark_ext_sort);
criterion_main!(ext_sort);
