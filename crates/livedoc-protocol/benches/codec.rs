//! Codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use livedoc_protocol::{codec, Frame};

fn bench_update_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_encode");

    for size in [256usize, 4096, 65536] {
        let frame = Frame::update("/docs/guide/intro", "x".repeat(size));
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("messagepack", size), &frame, |b, frame| {
            b.iter(|| codec::encode(black_box(frame)))
        });
        group.bench_with_input(BenchmarkId::new("json", size), &frame, |b, frame| {
            b.iter(|| codec::encode_json(black_box(frame)))
        });
    }

    group.finish();
}

fn bench_update_decoding(c: &mut Criterion) {
    let frame = Frame::update("/docs/guide/intro", "x".repeat(4096));
    let binary = codec::encode(&frame).unwrap();
    let text = codec::encode_json(&frame).unwrap();

    c.bench_function("decode/messagepack/4096", |b| {
        b.iter(|| codec::decode(black_box(&binary)))
    });
    c.bench_function("decode/json/4096", |b| {
        b.iter(|| codec::decode_json(black_box(&text)))
    });
}

criterion_group!(benches, bench_update_encoding, bench_update_decoding);
criterion_main!(benches);
