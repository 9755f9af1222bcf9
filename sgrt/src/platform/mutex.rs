//! Mutual exclusion primitives.
//!
//! [Mutex] and [RecursiveMutex] are thin wrappers around `parking_lot`'s raw locks. Unlike
//! `parking_lot::Mutex` they do not own the data they protect: callers pair them with an
//! `UnsafeCell` (or with data that is only ever touched while the lock is held) and acquire them
//! through a [LockGuard].
//!
//! Debug builds track how often each lock is held so that obvious misuse (unlocking a lock that
//! isn't held, dropping a lock that is) is caught with an assertion. Release builds carry no such
//! bookkeeping and misuse is undefined behaviour.

use super::lazy::LazyInstance;
use parking_lot::{
    lock_api::{self, RawReentrantMutex},
    RawMutex, RawThreadId,
};
use std::marker::PhantomData;
#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicUsize, Ordering};

/// A lock that can be acquired by a [LockGuard].
pub trait Lockable {
    /// Block the calling thread until it owns the lock.
    fn lock(&self);

    /// Release the lock.
    ///
    /// # Safety
    ///
    /// The calling thread must currently own the lock.
    unsafe fn unlock(&self);
}

/// A non-recursive mutual exclusion lock.
///
/// A thread owns a `Mutex` from the moment a call to [Mutex::lock] returns (or [Mutex::try_lock]
/// returns `true`) until it calls [Mutex::unlock]. While it is owned, other threads block in
/// [Mutex::lock] and get `false` from [Mutex::try_lock]. A thread must not lock a `Mutex` it
/// already owns: doing so deadlocks.
///
/// Dropping a `Mutex` while some thread owns it is undefined behaviour. No fairness between
/// blocked threads is promised.
pub struct Mutex {
    native_handle: RawMutex,
    /// How many times is this mutex currently held? Always 0 or 1.
    #[cfg(debug_assertions)]
    level: AtomicUsize,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            native_handle: <RawMutex as lock_api::RawMutex>::INIT,
            #[cfg(debug_assertions)]
            level: AtomicUsize::new(0),
        }
    }

    /// Lock this mutex, blocking until it is available.
    pub fn lock(&self) {
        lock_api::RawMutex::lock(&self.native_handle);
        self.assert_unheld_and_mark();
    }

    /// Unlock this mutex.
    ///
    /// # Safety
    ///
    /// The calling thread must own this mutex.
    pub unsafe fn unlock(&self) {
        self.assert_held_and_unmark();
        unsafe { lock_api::RawMutex::unlock(&self.native_handle) };
    }

    /// Try to lock this mutex without blocking. Returns `true` if the lock was acquired.
    #[must_use]
    pub fn try_lock(&self) -> bool {
        if lock_api::RawMutex::try_lock(&self.native_handle) {
            self.assert_unheld_and_mark();
            true
        } else {
            false
        }
    }

    /// Is this mutex currently owned by any thread? The answer may be out of date by the time the
    /// caller looks at it.
    pub fn is_locked(&self) -> bool {
        lock_api::RawMutex::is_locked(&self.native_handle)
    }

    #[inline]
    fn assert_held_and_unmark(&self) {
        #[cfg(debug_assertions)]
        {
            let old = self.level.load(Ordering::Relaxed);
            debug_assert_eq!(old, 1, "unlocking a Mutex that isn't held");
            self.level.store(old - 1, Ordering::Relaxed);
        }
    }

    #[inline]
    fn assert_unheld_and_mark(&self) {
        #[cfg(debug_assertions)]
        {
            let old = self.level.load(Ordering::Relaxed);
            debug_assert_eq!(old, 0, "Mutex acquired twice");
            self.level.store(old + 1, Ordering::Relaxed);
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Mutex {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert_eq!(
            *self.level.get_mut(),
            0,
            "Mutex dropped while still held"
        );
    }
}

impl Lockable for Mutex {
    fn lock(&self) {
        Mutex::lock(self)
    }

    unsafe fn unlock(&self) {
        unsafe { Mutex::unlock(self) }
    }
}

/// A recursive mutual exclusion lock.
///
/// The owning thread may call [RecursiveMutex::lock] (or [RecursiveMutex::try_lock]) repeatedly;
/// ownership only ends when it has made a matching number of calls to [RecursiveMutex::unlock].
/// While it is owned, other threads block in [RecursiveMutex::lock] and get `false` from
/// [RecursiveMutex::try_lock].
///
/// The maximum recursion depth is unspecified: exceeding it panics. Dropping a `RecursiveMutex`
/// while some thread owns it is undefined behaviour.
pub struct RecursiveMutex {
    native_handle: RawReentrantMutex<RawMutex, RawThreadId>,
    /// How many more `lock`s than `unlock`s has the owning thread performed?
    #[cfg(debug_assertions)]
    level: AtomicUsize,
}

impl RecursiveMutex {
    pub const fn new() -> Self {
        Self {
            native_handle: RawReentrantMutex::INIT,
            #[cfg(debug_assertions)]
            level: AtomicUsize::new(0),
        }
    }

    /// Lock this mutex, blocking until it is available. Returns immediately if the calling thread
    /// already owns it.
    pub fn lock(&self) {
        self.native_handle.lock();
        #[cfg(debug_assertions)]
        self.level.fetch_add(1, Ordering::Relaxed);
    }

    /// Reduce the calling thread's level of ownership by one, releasing the mutex when the level
    /// reaches zero.
    ///
    /// # Safety
    ///
    /// The calling thread must own this mutex.
    pub unsafe fn unlock(&self) {
        #[cfg(debug_assertions)]
        {
            debug_assert!(
                self.native_handle.is_owned_by_current_thread(),
                "unlocking a RecursiveMutex owned by another thread"
            );
            let old = self.level.load(Ordering::Relaxed);
            debug_assert!(old >= 1, "unlocking a RecursiveMutex that isn't held");
            self.level.store(old - 1, Ordering::Relaxed);
        }
        unsafe { self.native_handle.unlock() };
    }

    /// Try to lock this mutex without blocking. Returns `true` if the lock was acquired (or the
    /// calling thread already owned it).
    #[must_use]
    pub fn try_lock(&self) -> bool {
        if self.native_handle.try_lock() {
            #[cfg(debug_assertions)]
            self.level.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Is this mutex currently owned by the calling thread?
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.native_handle.is_owned_by_current_thread()
    }
}

impl Default for RecursiveMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RecursiveMutex {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert_eq!(
            *self.level.get_mut(),
            0,
            "RecursiveMutex dropped while still held"
        );
    }
}

impl Lockable for RecursiveMutex {
    fn lock(&self) {
        RecursiveMutex::lock(self)
    }

    unsafe fn unlock(&self) {
        unsafe { RecursiveMutex::unlock(self) }
    }
}

/// Owns a lock for the duration of a scope: the lock is acquired when the guard is created and
/// released, exactly once, when the guard is dropped, whichever way control leaves the scope.
///
/// A `LockGuard` is neither `Send` nor `Sync`: it must be released by the thread that acquired it.
#[must_use = "if unused the lock will be released immediately"]
pub struct LockGuard<'a, L: Lockable + ?Sized> {
    mutex: &'a L,
    // Raw pointers are neither send nor sync.
    _dont_send_or_sync_me: PhantomData<*mut ()>,
}

impl<'a, L: Lockable + ?Sized> LockGuard<'a, L> {
    pub fn new(mutex: &'a L) -> Self {
        mutex.lock();
        Self {
            mutex,
            _dont_send_or_sync_me: PhantomData,
        }
    }
}

impl<L: Lockable + ?Sized> Drop for LockGuard<'_, L> {
    fn drop(&mut self) {
        // We acquired the lock in `new` and nothing else can release it.
        unsafe { self.mutex.unlock() };
    }
}

/// A [Mutex] that can be declared as a `static` and is constructed on first use:
///
/// ```
/// use sgrt::platform::{LazyMutex, LockGuard, Mutex};
///
/// static MY_MUTEX: LazyMutex = LazyMutex::new(Mutex::new);
///
/// fn my_function() {
///     let _guard = LockGuard::new(MY_MUTEX.pointer());
///     // Do something.
/// }
/// # my_function();
/// ```
pub type LazyMutex = LazyInstance<Mutex>;

/// A [RecursiveMutex] that can be declared as a `static` and is constructed on first use.
pub type LazyRecursiveMutex = LazyInstance<RecursiveMutex>;
