//! Criterion benchmarks for the stack check fast path and for interrupt round trips.

use criterion::{
    criterion_group, criterion_main, measurement::Measurement, BenchmarkGroup, BenchmarkId,
    Criterion,
};
use sgrt::{
    platform::{LockGuard, Mutex, RecursiveMutex},
    stack_check, ContextBuilder, InterruptFlag, StackLimitCheck,
};
use std::{hint::black_box, time::Duration};
use tests::CountingHandler;

const SAMPLE_SIZE: usize = 50;
const MEASUREMENT_TIME: Duration = Duration::from_secs(5);

fn setup<'c, M: Measurement>(c: &'c mut Criterion<M>, group_name: &str) -> BenchmarkGroup<'c, M> {
    let mut group = c.benchmark_group(group_name);
    group.sample_size(SAMPLE_SIZE);
    group.measurement_time(MEASUREMENT_TIME);
    group
}

/// The check guarded code performs when nothing is pending: a load and a compare.
fn bench_fast_path(c: &mut Criterion) {
    let ctx = ContextBuilder::new().unwrap().build().unwrap();
    let ct = ctx.enter();
    let guard = ct.stack_guard();
    let mut h = CountingHandler::default();
    let mut group = setup(c, "fast-path");

    group.bench_function("should_trap", |b| {
        let check = StackLimitCheck::new(guard);
        b.iter(|| black_box(check.should_trap()))
    });
    group.bench_function("stack_check", |b| {
        b.iter(|| black_box(stack_check(guard, &mut h)))
    });
}

/// Request an interrupt and handle it at the next check.
fn bench_round_trip(c: &mut Criterion) {
    let ctx = ContextBuilder::new().unwrap().build().unwrap();
    let ct = ctx.enter();
    let guard = ct.stack_guard();
    let mut h = CountingHandler::default();
    let mut group = setup(c, "round-trip");

    for flag in [
        InterruptFlag::GcRequest,
        InterruptFlag::Preempt,
        InterruptFlag::Interrupt,
    ] {
        group.bench_function(BenchmarkId::new("request+handle", flag), |b| {
            b.iter(|| {
                guard.request(flag);
                stack_check(guard, &mut h).unwrap();
            })
        });
    }
    group.bench_function("postponed", |b| {
        b.iter(|| {
            let p = guard.postpone_interrupts();
            guard.request_gc();
            drop(p);
            stack_check(guard, &mut h).unwrap();
        })
    });
}

fn bench_locks(c: &mut Criterion) {
    let m = Mutex::new();
    let rm = RecursiveMutex::new();
    let mut group = setup(c, "locks");

    group.bench_function("mutex", |b| b.iter(|| drop(LockGuard::new(&m))));
    group.bench_function("recursive_mutex", |b| {
        b.iter(|| {
            let _outer = LockGuard::new(&rm);
            drop(LockGuard::new(&rm));
        })
    });
}

criterion_group!(
    stack_guard_benchmarks,
    bench_fast_path,
    bench_round_trip,
    bench_locks
);
criterion_main!(stack_guard_benchmarks);
