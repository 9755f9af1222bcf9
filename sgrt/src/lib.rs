//! A stack guard: lets any thread interrupt code running in an execution context, at the cost of
//! a single comparison of the stack pointer against a limit on the interrupted code's fast path.
//!
//! The main entry points are [ExecutionContext], which threads enter to run guarded code,
//! [StackGuard], which holds the limits and pending interrupts, and
//! [handle_stack_guard_interrupt], which guarded code calls when its stack check fails.

mod context;
mod errors;
mod execution;
mod log;
pub mod platform;
mod stack_guard;

pub use context::{ContextBuilder, ContextThread, ExecutionContext};
pub use errors::GuardError;
pub use execution::{
    handle_stack_guard_interrupt, invoke, stack_check, stack_check_at, InterruptHandler,
    InvocationScope,
};
pub use stack_guard::{
    ExecutionAccess, GuardConfig, InterruptCallback, InterruptFlag, InterruptFlags,
    PostponeInterruptsScope, StackGuard, StackLimitCheck, ARCHIVE_SPACE_PER_THREAD,
    DEFAULT_STACK_SIZE_KB, ILLEGAL_LIMIT, INTERRUPT_LIMIT,
};
