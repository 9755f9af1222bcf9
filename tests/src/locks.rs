//! The lock primitives under contention.

use parking_lot::{Condvar, Mutex as PlMutex};
use sgrt::platform::{LazyMutex, LazyRecursiveMutex, LockGuard, Mutex, RecursiveMutex};
use std::{cell::UnsafeCell, sync::Arc, thread, time::Duration};

struct Counter(UnsafeCell<u64>);

// Only touched while holding `COUNTER_LOCK`.
unsafe impl Sync for Counter {}

static COUNTER_LOCK: LazyMutex = LazyMutex::new(Mutex::new);
static COUNTER: Counter = Counter(UnsafeCell::new(0));

#[test]
fn lazy_mutex_excludes() {
    const THREADS: u64 = 8;
    const ITERS: u64 = 10_000;

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..ITERS {
                    let _g = LockGuard::new(COUNTER_LOCK.pointer());
                    // A non-atomic read-modify-write: lost updates would show up in the total.
                    unsafe {
                        let v = *COUNTER.0.get();
                        *COUNTER.0.get() = v + 1;
                    }
                }
            });
        }
    });
    let _g = LockGuard::new(COUNTER_LOCK.pointer());
    assert_eq!(unsafe { *COUNTER.0.get() }, THREADS * ITERS);
}

#[test]
fn try_lock_while_held() {
    let m = Arc::new(Mutex::new());
    // (held, released)
    let state = Arc::new((PlMutex::new((false, false)), Condvar::new()));
    let t = thread::spawn({
        let (m, state) = (Arc::clone(&m), Arc::clone(&state));
        move || {
            let g = LockGuard::new(&*m);
            let (lk, cv) = &*state;
            lk.lock().0 = true;
            cv.notify_all();
            let mut st = lk.lock();
            while !st.1 {
                cv.wait(&mut st);
            }
            drop(g);
        }
    });
    let (lk, cv) = &*state;
    {
        let mut st = lk.lock();
        while !st.0 {
            cv.wait(&mut st);
        }
    }
    for _ in 0..100 {
        assert!(!m.try_lock());
    }
    lk.lock().1 = true;
    cv.notify_all();
    t.join().unwrap();
    assert!(m.try_lock());
    unsafe { m.unlock() };
}

static RLOCK: LazyRecursiveMutex = LazyRecursiveMutex::new(RecursiveMutex::new);

#[test]
fn recursive_needs_every_unlock() {
    const DEPTH: usize = 5;

    let rm = RLOCK.pointer();
    for _ in 0..DEPTH {
        rm.lock();
    }
    thread::scope(|s| {
        for remaining in (1..=DEPTH).rev() {
            assert!(
                !s.spawn(|| {
                    let got = rm.try_lock();
                    if got {
                        unsafe { rm.unlock() };
                    }
                    got
                })
                .join()
                .unwrap(),
                "acquired with {remaining} levels still held"
            );
            unsafe { rm.unlock() };
        }
        // Now fully released, another thread can take it.
        let t = s.spawn(|| {
            let _g = LockGuard::new(rm);
            thread::sleep(Duration::from_millis(10));
            rm.is_owned_by_current_thread()
        });
        assert!(t.join().unwrap());
    });
    assert!(rm.try_lock());
    unsafe { rm.unlock() };
}
