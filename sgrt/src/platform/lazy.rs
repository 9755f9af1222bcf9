//! Values that are constructed on first use.

use parking_lot::Once;
use std::{cell::UnsafeCell, mem::MaybeUninit};

/// A value of type `T` that is constructed, by calling `init`, the first time [LazyInstance::pointer]
/// is called. This allows values which can't be built in a `const` context to be declared as
/// `static`s without any dependency on the order that statics are initialised in.
///
/// Construction happens exactly once even if many threads race to call `pointer` for the first
/// time: the losers block until the winner has finished. Once constructed, `pointer` is a single
/// atomic load. The one-shot barrier is a `parking_lot::Once` rather than any of the locks in
/// [super::mutex], so a `LazyInstance` can itself wrap a lock.
///
/// If `init` panics, the instance is poisoned and all later calls to `pointer` panic.
pub struct LazyInstance<T> {
    once: Once,
    init: fn() -> T,
    value: UnsafeCell<MaybeUninit<T>>,
}

// `value` is only written once, inside `once`, and only read after `once` has completed.
unsafe impl<T: Send + Sync> Sync for LazyInstance<T> {}
unsafe impl<T: Send> Send for LazyInstance<T> {}

impl<T> LazyInstance<T> {
    pub const fn new(init: fn() -> T) -> Self {
        Self {
            once: Once::new(),
            init,
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Return a reference to the wrapped value, constructing it if this is the first call.
    #[inline]
    pub fn pointer(&self) -> &T {
        self.once.call_once(|| {
            let v = (self.init)();
            unsafe { (*self.value.get()).write(v) };
        });
        unsafe { (*self.value.get()).assume_init_ref() }
    }

    /// Has the wrapped value been constructed yet?
    pub fn is_initialized(&self) -> bool {
        self.once.state().done()
    }
}

impl<T> Drop for LazyInstance<T> {
    fn drop(&mut self) {
        if self.once.state().done() {
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}
