//! Fan-out benchmarks for the livedoc hub.
//!
//! Measures a broadcast reaching every subscriber of a route, including the
//! subscribers pulling it from their outboxes.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use livedoc_bench::{drain_once, subscribed_hub};
use livedoc_core::Message;
use std::time::Instant;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Broadcast to N subscribers of one route.
fn bench_fanout(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("fanout");

    for size in [1usize, 10, 100, 1000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_custom(|iters| {
                rt.block_on(async {
                    let mut fixture = subscribed_hub("/docs/a", size, 16).await.unwrap();
                    let message = Message::new("/docs/a", Bytes::from(vec![0u8; 1024]));

                    let start = Instant::now();
                    for _ in 0..iters {
                        fixture.hub.broadcast(black_box(message.clone())).await;
                        drain_once(&mut fixture.outboxes).await;
                    }
                    start.elapsed()
                })
            });
        });
    }

    group.finish();
}

/// Broadcast to a route nobody watches while other routes are busy.
fn bench_route_isolation(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("route_isolation");

    group.bench_function("unwatched_route_1000_subs", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let fixture = subscribed_hub("/docs/a", 1000, 16).await.unwrap();
                let message = Message::new("/docs/b", Bytes::from_static(b"<p>b</p>"));

                let start = Instant::now();
                for _ in 0..iters {
                    fixture.hub.broadcast(black_box(message.clone())).await;
                }
                // Queued broadcasts are answered before the stats query.
                let _ = fixture.hub.stats().await;
                start.elapsed()
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_fanout, bench_route_isolation);
criterion_main!(benches);
