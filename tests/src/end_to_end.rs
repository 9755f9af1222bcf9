//! Interrupting a guarded thread from other threads.

use crate::{check_until, CountingHandler};
use sgrt::{
    platform::current_stack_position, stack_check, stack_check_at, ContextBuilder, GuardError,
    InterruptFlag, StackLimitCheck, INTERRUPT_LIMIT,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Barrier,
    },
    thread,
};

/// One thread sets a limit, another requests a GC: the first thread's next check traps, the GC is
/// dispatched once, and afterwards checks only fail below the limit.
#[test]
fn gc_request_from_another_thread() {
    let ctx = ContextBuilder::new().unwrap().build().unwrap();
    let barrier = Barrier::new(2);
    thread::scope(|s| {
        s.spawn(|| {
            let ct = ctx.enter();
            let guard = ct.stack_guard();
            let limit = current_stack_position() - 128 * 1024;
            guard.set_stack_limit(limit);
            let mut h = CountingHandler::default();
            assert_eq!(stack_check(guard, &mut h), Ok(()));
            assert_eq!(h.ticks, 0);
            barrier.wait();

            check_until(guard, &mut h, |h| h.gcs > 0).unwrap();
            assert_eq!(h.gcs, 1);
            assert!(!guard.is_gc_request());
            assert_eq!(guard.js_limit(), limit);
            assert_eq!(guard.native_limit(), limit);

            // Later checks pass until the stack pointer is below the limit.
            for _ in 0..1000 {
                assert_eq!(stack_check(guard, &mut h), Ok(()));
            }
            assert_eq!(stack_check_at(guard, &mut h, limit), Ok(()));
            assert_eq!(
                stack_check_at(guard, &mut h, limit - 1),
                Err(GuardError::StackOverflow)
            );
            assert_eq!(h.gcs, 1);
        });
        s.spawn(|| {
            barrier.wait();
            ctx.stack_guard().request_gc();
        });
    });
}

#[test]
fn terminate_stops_a_loop() {
    let ctx = ContextBuilder::new().unwrap().build().unwrap();
    let started = AtomicBool::new(false);
    thread::scope(|s| {
        let worker = s.spawn(|| {
            let ct = ctx.enter();
            let guard = ct.stack_guard();
            let mut h = CountingHandler::default();
            started.store(true, Ordering::SeqCst);
            let r = check_until(guard, &mut h, |_| false);
            assert!(guard.is_terminate_execution());
            guard.cancel_terminate_execution();
            assert_eq!(stack_check(guard, &mut h), Ok(()));
            r
        });
        while !started.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        ctx.stack_guard().terminate_execution();
        assert_eq!(worker.join().unwrap(), Err(GuardError::TerminateExecution));
    });
}

#[test]
fn postponed_requests_wait_for_scope_exit() {
    let ctx = ContextBuilder::new().unwrap().build().unwrap();
    let barrier = Barrier::new(2);
    thread::scope(|s| {
        s.spawn(|| {
            let ct = ctx.enter();
            let guard = ct.stack_guard();
            let mut h = CountingHandler::default();
            {
                let _p = guard.postpone_interrupts();
                barrier.wait();
                // The requests have been made.
                barrier.wait();
                assert!(!StackLimitCheck::new(guard).should_trap());
                assert_eq!(stack_check(guard, &mut h), Ok(()));
                assert!(guard.is_preempted() && guard.is_interrupted());
            }
            assert_eq!(guard.js_limit(), INTERRUPT_LIMIT);
            assert_eq!(stack_check(guard, &mut h), Ok(()));
            assert_eq!((h.preempts, h.interrupts, h.ticks), (1, 1, 1));
            assert_eq!(guard.js_limit(), guard.real_js_limit());
        });
        s.spawn(|| {
            barrier.wait();
            let guard = ctx.stack_guard();
            guard.preempt();
            guard.preempt();
            guard.request(InterruptFlag::Interrupt);
            barrier.wait();
        });
    });
}

#[test]
fn many_requesters() {
    const REQUESTERS: usize = 8;
    const ROUNDS: usize = 200;

    let ctx = ContextBuilder::new().unwrap().build().unwrap();
    let done = AtomicBool::new(false);
    thread::scope(|s| {
        let worker = s.spawn(|| {
            let ct = ctx.enter();
            let mut h = CountingHandler::default();
            check_until(ct.stack_guard(), &mut h, |_| done.load(Ordering::SeqCst)).unwrap();
            // Anything requested after the last check is still pending.
            stack_check(ct.stack_guard(), &mut h).unwrap();
            h
        });
        let requesters = (0..REQUESTERS)
            .map(|i| {
                let ctx = &ctx;
                s.spawn(move || {
                    for _ in 0..ROUNDS {
                        if i % 2 == 0 {
                            ctx.stack_guard().preempt();
                        } else {
                            ctx.stack_guard().request_gc();
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        for r in requesters {
            r.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
        let h = worker.join().unwrap();
        // Requests coalesce, so there are at least one and at most as many dispatches as requests.
        assert!(h.preempts >= 1 && h.preempts <= REQUESTERS / 2 * ROUNDS);
        assert!(h.gcs >= 1 && h.gcs <= REQUESTERS / 2 * ROUNDS);
        assert!(ctx.stack_guard().pending().is_empty());
    });
}
