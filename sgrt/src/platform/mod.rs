//! Platform primitives: locks, lazily constructed values, and the native stack.

mod lazy;
mod mutex;
pub(crate) mod stack;

pub use lazy::LazyInstance;
pub use mutex::{LazyMutex, LazyRecursiveMutex, LockGuard, Lockable, Mutex, RecursiveMutex};
pub use stack::current_stack_position;
