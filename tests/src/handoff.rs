//! Threads taking turns in a shared context.

use crate::CountingHandler;
use sgrt::{
    platform::current_stack_position, stack_check, ContextBuilder, ExecutionContext,
    InvocationScope, StackLimitCheck, ILLEGAL_LIMIT,
};
use std::{
    sync::{Arc, Barrier},
    thread,
};

/// Every thread sees its own limit each time it enters, however the turns interleave.
#[test]
fn limits_follow_their_threads() {
    const THREADS: usize = 6;
    const TURNS: usize = 50;

    let ctx = ContextBuilder::new().unwrap().build().unwrap();
    thread::scope(|s| {
        for i in 0..THREADS {
            let ctx = &ctx;
            s.spawn(move || {
                let own = {
                    let ct = ctx.enter();
                    let own = current_stack_position() - 4096 * (i + 1);
                    ct.stack_guard().set_stack_limit(own);
                    own
                };
                for _ in 0..TURNS {
                    let ct = ctx.enter();
                    let guard = ct.stack_guard();
                    assert_eq!(guard.real_js_limit(), own);
                    assert_eq!(guard.js_limit(), own);
                    assert_eq!(guard.nesting_depth(), 0);
                    let _inv = InvocationScope::enter(guard).unwrap();
                    thread::yield_now();
                }
            });
        }
    });
    assert_eq!(ctx.archived_threads(), THREADS);
    assert_eq!(ctx.stack_guard().real_js_limit(), ILLEGAL_LIMIT);
}

/// A request made while the context is empty is delivered to whichever thread enters next.
#[test]
fn request_while_empty() {
    let ctx = ContextBuilder::new().unwrap().build().unwrap();
    ctx.stack_guard().preempt();
    let h = thread::spawn({
        let ctx = Arc::clone(&ctx);
        move || {
            let ct = ctx.enter();
            let mut h = CountingHandler::default();
            stack_check(ct.stack_guard(), &mut h).unwrap();
            h.preempts
        }
    })
    .join()
    .unwrap();
    assert_eq!(h, 1);
}

/// Nested entries on one thread share one record, and a nested invocation's depth survives the
/// thread leaving and coming back.
#[test]
fn nesting_survives_handoff() {
    let ctx = ContextBuilder::new().unwrap().max_nesting(3).build().unwrap();
    let outer = ctx.enter();
    let inv = InvocationScope::enter(ctx.stack_guard()).unwrap();
    {
        let inner = ctx.enter();
        assert_eq!(inner.stack_guard().nesting_depth(), 1);
    }
    drop(outer);

    // Another thread gets a fresh record.
    thread::scope(|s| {
        s.spawn(|| {
            let ct = ctx.enter();
            assert_eq!(ct.stack_guard().nesting_depth(), 0);
        });
    });

    let outer = ctx.enter();
    assert_eq!(outer.stack_guard().nesting_depth(), 1);
    drop(inv);
    assert_eq!(outer.stack_guard().nesting_depth(), 0);
}

/// Scopes one thread leaves open when its turn ends don't change the counters of the thread that
/// enters next, so that thread's requests still arm its limits.
#[test]
fn scopes_outliving_a_turn_stay_with_their_thread() {
    let ctx = ContextBuilder::new().unwrap().build().unwrap();
    let barrier = Barrier::new(2);
    let ct = ctx.enter();
    let inv = InvocationScope::enter(ctx.stack_guard()).unwrap();
    let postponed = ctx.stack_guard().postpone_interrupts();
    drop(ct);

    thread::scope(|s| {
        let other = s.spawn(|| {
            let ct = ctx.enter();
            let guard = ct.stack_guard();
            barrier.wait();
            // The first thread has dropped its scopes.
            barrier.wait();
            assert_eq!(guard.nesting_depth(), 0);
            assert!(!guard.should_postpone_interrupts());
            guard.request_gc();
            assert!(StackLimitCheck::new(guard).should_trap());
            let mut h = CountingHandler::default();
            stack_check(guard, &mut h).unwrap();
            assert_eq!(h.gcs, 1);
            let _inv = InvocationScope::enter(guard).unwrap();
            assert_eq!(guard.nesting_depth(), 1);
        });
        barrier.wait();
        drop(postponed);
        drop(inv);
        barrier.wait();
        other.join().unwrap();
    });
}

#[test]
fn global_context() {
    let ctx = ExecutionContext::global();
    let ct = ctx.enter();
    assert!(ctx.is_entered());
    assert!(ct.stack_guard().real_js_limit() < current_stack_position());
}
