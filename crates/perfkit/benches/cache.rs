// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(
    missing_docs,
    clippy::unwrap_used,
    reason = "Benchmarks don't require documentation and should fail fast on errors"
)]

use std::convert::Infallible;
use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use perfkit::cache::RecencyCache;
use perfkit::memo::Memoize;
use tick::Clock;

const CAPACITY: usize = 1024;

fn filled(clock: &Clock) -> RecencyCache<u64, u64> {
    let cache = RecencyCache::new("bench", CAPACITY, clock.clone()).unwrap();
    for key in 0..CAPACITY as u64 {
        cache.set(key, key);
    }
    cache
}

fn entry(c: &mut Criterion) {
    let mut group = c.benchmark_group("recency_cache");
    let clock = Clock::new_frozen();

    let cache = filled(&clock);
    group.bench_function("get_hit", |b| {
        let mut key = 0_u64;
        b.iter(|| {
            key = (key + 1) % CAPACITY as u64;
            black_box(cache.get(&key))
        });
    });

    group.bench_function("get_miss", |b| b.iter(|| black_box(cache.get(&u64::MAX))));

    let cache = filled(&clock);
    group.bench_function("set_with_eviction", |b| {
        let mut key = CAPACITY as u64;
        b.iter(|| {
            key += 1;
            cache.set(black_box(key), key);
        });
    });

    group.finish();

    let mut group = c.benchmark_group("memoize");
    let square = Memoize::new("square", memo_cache(&clock)).wrap(|x: u64| Ok::<_, Infallible>(x * x));
    square.call(7).unwrap();

    group.bench_function("cached_call", |b| b.iter(|| black_box(square.call(black_box(7)))));

    group.finish();
}

fn memo_cache(clock: &Clock) -> RecencyCache<perfkit::memo::MemoKey, u64> {
    RecencyCache::new("memo_bench", CAPACITY, clock.clone()).unwrap()
}

criterion_group!(benches, entry);
criterion_main!(benches);
