//! This crate exports the stack guard API via the C ABI.
//!
//! We use a dedicated crate for exporting to C, as you quickly get into linkage trouble if you try
//! and mix Rust dynamic libraries (namely you can get duplicate copies of dependencies).
//!
//! Contexts are handed to C as raw pointers. A context created by [sg_context_new] must be freed
//! with [sg_context_drop]; the context returned by [sg_context_global] must never be freed.

use libc::c_void;
use sgrt::{
    ContextBuilder, ContextThread, ExecutionContext, GuardError, InterruptCallback,
    InterruptHandler, ARCHIVE_SPACE_PER_THREAD,
};
use std::{ptr, sync::Arc};

/// The outcome of a stack check or an invocation, as seen from C.
#[repr(C)]
#[derive(Debug, PartialEq)]
pub enum SgStatus {
    Ok = 0,
    StackOverflow = 1,
    Terminated = 2,
    NestingTooDeep = 3,
    /// A thread's archived guard state couldn't be saved or restored.
    ArchiveError = 4,
}

impl From<Result<(), GuardError>> for SgStatus {
    fn from(r: Result<(), GuardError>) -> Self {
        match r {
            Ok(()) => SgStatus::Ok,
            Err(GuardError::StackOverflow) => SgStatus::StackOverflow,
            Err(GuardError::TerminateExecution) => SgStatus::Terminated,
            Err(GuardError::NestingTooDeep { .. }) => SgStatus::NestingTooDeep,
            Err(GuardError::ArchiveTooSmall { .. } | GuardError::ArchiveInvalid(_)) => {
                SgStatus::ArchiveError
            }
        }
    }
}

/// Create a context configured from the environment. Returns null (after printing the reason to
/// stderr) if the environment holds an invalid configuration.
#[no_mangle]
pub extern "C" fn sg_context_new() -> *const ExecutionContext {
    match ContextBuilder::new().and_then(ContextBuilder::build) {
        Ok(ctx) => Arc::into_raw(ctx),
        Err(e) => {
            eprintln!("sg_context_new: {e}");
            ptr::null()
        }
    }
}

#[no_mangle]
pub extern "C" fn sg_context_drop(ctx: *const ExecutionContext) {
    if !ctx.is_null() {
        drop(unsafe { Arc::from_raw(ctx) });
    }
}

#[no_mangle]
pub extern "C" fn sg_context_global() -> *const ExecutionContext {
    ExecutionContext::global()
}

/// Enter `ctx` on the calling thread, blocking until no other thread is inside it. The returned
/// handle must be passed to [sg_context_exit] on the same thread.
#[no_mangle]
pub extern "C" fn sg_context_enter(ctx: *const ExecutionContext) -> *mut ContextThread<'static> {
    let ctx = unsafe { &*ctx };
    Box::into_raw(Box::new(ctx.enter()))
}

#[no_mangle]
pub extern "C" fn sg_context_exit(ct: *mut ContextThread<'static>) {
    drop(unsafe { Box::from_raw(ct) });
}

#[no_mangle]
pub extern "C" fn sg_set_stack_limit(ctx: *const ExecutionContext, limit: usize) {
    unsafe { &*ctx }.stack_guard().set_stack_limit(limit);
}

/// C callers have nobody to dispatch to beyond the API interrupt callback.
struct CHandler;

impl InterruptHandler for CHandler {}

/// Check the stack of the thread inside `ctx`, handling any pending interrupts.
#[no_mangle]
pub extern "C" fn sg_stack_check(ctx: *const ExecutionContext) -> SgStatus {
    sgrt::stack_check(unsafe { &*ctx }.stack_guard(), &mut CHandler).into()
}

/// Call `f(data)` as a nested invocation in `ctx`, which the calling thread must have entered.
/// `f` isn't called if the stack has already overflowed or if `SG_MAX_NESTING` invocations are
/// already active.
#[no_mangle]
pub extern "C" fn sg_invoke(
    ctx: *const ExecutionContext,
    f: extern "C" fn(*mut c_void),
    data: *mut c_void,
) -> SgStatus {
    sgrt::invoke(unsafe { &*ctx }.stack_guard(), || f(data)).into()
}

/// Write out the statistics `ctx` has gathered so far, if `SGD_LOG_STATS` is set. The global
/// context is never freed, so this is the only way to see its statistics.
#[no_mangle]
pub extern "C" fn sg_context_output_stats(ctx: *const ExecutionContext) {
    unsafe { &*ctx }.output_stats();
}

#[no_mangle]
pub extern "C" fn sg_request_interrupt(
    ctx: *const ExecutionContext,
    cb: InterruptCallback,
    data: *mut c_void,
) {
    unsafe { &*ctx }.stack_guard().request_interrupt(cb, data);
}

#[no_mangle]
pub extern "C" fn sg_clear_interrupt(ctx: *const ExecutionContext) {
    unsafe { &*ctx }.stack_guard().clear_interrupt();
}

#[no_mangle]
pub extern "C" fn sg_terminate_execution(ctx: *const ExecutionContext) {
    unsafe { &*ctx }.stack_guard().terminate_execution();
}

#[no_mangle]
pub extern "C" fn sg_cancel_terminate_execution(ctx: *const ExecutionContext) {
    unsafe { &*ctx }.stack_guard().cancel_terminate_execution();
}

#[no_mangle]
pub extern "C" fn sg_is_terminating(ctx: *const ExecutionContext) -> bool {
    unsafe { &*ctx }.stack_guard().is_terminate_execution()
}

#[no_mangle]
pub extern "C" fn sg_request_gc(ctx: *const ExecutionContext) {
    unsafe { &*ctx }.stack_guard().request_gc();
}

#[no_mangle]
pub extern "C" fn sg_preempt(ctx: *const ExecutionContext) {
    unsafe { &*ctx }.stack_guard().preempt();
}

#[no_mangle]
pub extern "C" fn sg_archive_space_per_thread() -> usize {
    ARCHIVE_SPACE_PER_THREAD
}
