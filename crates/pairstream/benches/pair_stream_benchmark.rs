//! # Pair Stream Benchmark
//!
//! Measures the paths a physics step hits every frame:
//! - sequential and concurrent insertion
//! - merging per-thread containers
//! - enumeration and parallel dispatch
//!
//! Run with: `cargo bench --package pairstream --bench pair_stream_benchmark`

// Benchmarks don't need docs
#![allow(missing_docs)]

use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pairstream::{EntityId, PairSide, PairStream, ParallelWriteKey};

const BUCKETS: u32 = 8;
const PAIRS: u32 = 100_000;
const THREADS: u32 = 4;

fn side(index: u32, read_write: bool) -> PairSide {
    let entity = EntityId::new(index, 0);
    if read_write {
        PairSide::read_write(entity, index % BUCKETS)
    } else {
        PairSide::read_only(entity, index % BUCKETS)
    }
}

fn filled(pairs: u32) -> PairStream {
    let mut stream = PairStream::new(BUCKETS).unwrap();
    for i in 0..pairs {
        stream.add_pair(side(i, true), side(i + BUCKETS, false)).unwrap();
    }
    stream
}

/// Benchmark: single-threaded insertion, with and without payloads.
fn bench_sequential_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_insert");
    group.throughput(Throughput::Elements(u64::from(PAIRS)));

    group.bench_function("bare", |b| {
        b.iter(|| black_box(filled(PAIRS).pair_count()));
    });

    group.bench_function("typed_payload", |b| {
        b.iter(|| {
            let mut stream = PairStream::new(BUCKETS).unwrap();
            for i in 0..PAIRS {
                let (mut depth, _) = stream
                    .add_pair_typed::<f32>(side(i, true), side(i + BUCKETS, false))
                    .unwrap();
                *depth = 0.5;
            }
            black_box(stream.pair_count())
        });
    });

    group.finish();
}

/// Benchmark: many threads inserting into one container.
fn bench_parallel_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_insert");
    group.throughput(Throughput::Elements(u64::from(PAIRS)));

    for threads in [1, 2, THREADS] {
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            b.iter(|| {
                let stream = PairStream::new(BUCKETS).unwrap();
                let writer = stream.parallel_writer();
                thread::scope(|scope| {
                    for worker in 0..threads {
                        let writer = &writer;
                        scope.spawn(move || {
                            for i in (worker..PAIRS).step_by(threads as usize) {
                                let bucket = i % BUCKETS;
                                let key = ParallelWriteKey::new(
                                    EntityId::new(i, 0),
                                    bucket,
                                    EntityId::new(i + BUCKETS, 0),
                                    bucket,
                                );
                                black_box(writer.add_pair(key, true, false).unwrap());
                            }
                        });
                    }
                });
                drop(writer);
                black_box(stream.pair_count())
            });
        });
    }

    group.finish();
}

/// Benchmark: merging per-thread containers into one.
fn bench_concatenate(c: &mut Criterion) {
    c.bench_function("concatenate_4x25k", |b| {
        b.iter_batched(
            || (0..THREADS).map(|_| filled(PAIRS / THREADS)).collect::<Vec<_>>(),
            |parts| {
                let mut merged = PairStream::new(BUCKETS).unwrap();
                for mut part in parts {
                    merged.concatenate_from(&mut part).unwrap();
                }
                black_box(merged.pair_count())
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

/// Benchmark: walking every pair, sequentially and in parallel.
fn bench_consume(c: &mut Criterion) {
    let mut stream = filled(PAIRS);
    let mut group = c.benchmark_group("consume");
    group.throughput(Throughput::Elements(u64::from(PAIRS)));

    group.bench_function("enumerate", |b| {
        b.iter(|| {
            let sum: u64 = stream
                .enumerator()
                .map(|pair| u64::from(pair.unwrap().entity_a().index()))
                .sum();
            black_box(sum)
        });
    });

    group.bench_function("dispatch_parallel", |b| {
        b.iter(|| {
            black_box(
                stream
                    .for_each_pair_parallel(THREADS as usize, |pair, _| {
                        black_box(pair.entity_b());
                    })
                    .unwrap(),
            )
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_sequential_insert,
    bench_parallel_insert,
    bench_concatenate,
    bench_consume
);
criterion_main!(benches);
