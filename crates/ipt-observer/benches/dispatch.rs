//! Observer dispatch benchmarks.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ipt_observer::prelude::*;

/// Re-arms itself a fixed period after every notification.
struct Periodic {
    period: u64,
}

impl Observer for Periodic {
    fn on_tick(&mut self, sub: &mut Subscription, tick: Tick) -> ObserverResult<()> {
        sub.limit = tick.tsc + self.period;
        Ok(())
    }

    fn on_state(&mut self, _sub: &mut Subscription, state: DecodeState) -> ObserverResult<()> {
        black_box(state);
        Ok(())
    }
}

fn populated(count: u64) -> ObserverCollection<Periodic> {
    let mut observers = ObserverCollection::new();
    for i in 0..count {
        let period = 16 + i % 64;
        observers
            .register(Periodic { period }, Subscription::tick_at(period).with_state())
            .unwrap();
    }
    observers
}

fn fast_path_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick_fast_path");

    for count in [1, 100, 1000] {
        let mut observers = populated(count);

        group.bench_with_input(BenchmarkId::new("below_limit", count), &count, |b, _| {
            b.iter(|| observers.tick(black_box(1), 0, 0).unwrap());
        });
    }

    group.finish();
}

fn dispatch_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    for count in [1, 100, 1000] {
        group.throughput(Throughput::Elements(count));

        group.bench_with_input(BenchmarkId::new("tick_pass", count), &count, |b, &count| {
            let mut observers = populated(count);
            let mut tsc = 0;
            b.iter(|| {
                tsc += 8;
                observers.tick(black_box(tsc), 0, 0).unwrap();
            });
        });

        group.bench_with_input(BenchmarkId::new("state", count), &count, |b, &count| {
            let mut observers = populated(count);
            b.iter(|| observers.notify_state(black_box(DecodeState::Enabled)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, fast_path_benchmarks, dispatch_benchmarks);
criterion_main!(benches);
