//! Running guarded code, and dispatching the interrupts that a failed stack check uncovers.

use crate::{
    errors::GuardError,
    log::Verbosity,
    platform::current_stack_position,
    stack_guard::{InterruptFlag, InterruptFlags, StackGuard, StackLimitCheck},
};
use std::marker::PhantomData;

/// The parts of the system that act on interrupts. Every method defaults to doing nothing, so an
/// implementor only needs to provide the ones it cares about.
pub trait InterruptHandler {
    fn collect_garbage(&mut self) {}
    fn debug_break(&mut self) {}
    /// Process queued debugger messages. `debug_command_only` is true if no debug break was
    /// requested alongside the command.
    fn process_debug_messages(&mut self, _debug_command_only: bool) {}
    fn preempt(&mut self) {}
    fn deopt_marked_allocation_sites(&mut self) {}
    fn full_deopt(&mut self) {}
    fn install_code(&mut self) {}
    fn interrupt(&mut self) {}
    /// Called once for every trap that gets as far as dispatching interrupts.
    fn optimize_now(&mut self) {}
}

/// Check the stack at the current position and, if the check fails, handle the trap.
#[inline]
pub fn stack_check<H: InterruptHandler + ?Sized>(
    guard: &StackGuard,
    handler: &mut H,
) -> Result<(), GuardError> {
    stack_check_at(guard, handler, current_stack_position())
}

/// Check the stack at position `sp` and, if the check fails, handle the trap.
#[inline]
pub fn stack_check_at<H: InterruptHandler + ?Sized>(
    guard: &StackGuard,
    handler: &mut H,
    sp: usize,
) -> Result<(), GuardError> {
    if StackLimitCheck::new(guard).should_trap_at(sp) {
        handle_stack_guard_interrupt(guard, handler, sp)
    } else {
        Ok(())
    }
}

/// Handle a failed stack check at stack position `sp`.
///
/// A genuine overflow takes precedence over everything else. Otherwise, if interrupts are
/// postponed, the limits are disarmed and the pending interrupts are left for later. Otherwise
/// each pending interrupt is cleared and dispatched to `handler`. A pending termination is never
/// cleared here: it makes this function return [GuardError::TerminateExecution] until it is
/// cancelled, without dispatching the interrupts that come after it.
pub fn handle_stack_guard_interrupt<H: InterruptHandler + ?Sized>(
    guard: &StackGuard,
    handler: &mut H,
    sp: usize,
) -> Result<(), GuardError> {
    if sp < guard.real_native_limit() || sp < guard.real_js_limit() {
        guard.stats().stack_overflow();
        guard
            .log()
            .log(Verbosity::Warning, &format!("stack overflow at {sp:#x}"));
        return Err(GuardError::StackOverflow);
    }

    if guard.disarm_if_postponed() {
        guard.stats().postponed_trap();
        return Ok(());
    }

    let pending = guard.pending();
    if take(guard, pending, InterruptFlag::ApiInterrupt) {
        guard.invoke_interrupt_callback();
    }
    if take(guard, pending, InterruptFlag::GcRequest) {
        handler.collect_garbage();
    }
    handler.optimize_now();

    let debug_break = take(guard, pending, InterruptFlag::DebugBreak);
    if debug_break {
        handler.debug_break();
    }
    if take(guard, pending, InterruptFlag::DebugCommand) {
        handler.process_debug_messages(!debug_break);
    }
    if take(guard, pending, InterruptFlag::Preempt) {
        handler.preempt();
    }
    if pending.contains(InterruptFlag::Terminate) {
        guard.stats().interrupt_handled(InterruptFlag::Terminate);
        guard.log().log(Verbosity::InterruptEvent, "handle terminate");
        return Err(GuardError::TerminateExecution);
    }
    if take(guard, pending, InterruptFlag::Interrupt) {
        handler.interrupt();
    }
    if take(guard, pending, InterruptFlag::FullDeopt) {
        handler.full_deopt();
    }
    if take(guard, pending, InterruptFlag::InstallCode) {
        handler.install_code();
    }
    if take(guard, pending, InterruptFlag::DeoptMarkedAllocationSites) {
        handler.deopt_marked_allocation_sites();
    }
    Ok(())
}

/// If `flag` is in `pending`, clear it in `guard` and return `true`. It's cleared before being
/// dispatched so that a request made while dispatching isn't lost.
fn take(guard: &StackGuard, pending: InterruptFlags, flag: InterruptFlag) -> bool {
    if !pending.contains(flag) {
        return false;
    }
    guard.continue_after(flag);
    guard.stats().interrupt_handled(flag);
    if guard.log().enabled(Verbosity::InterruptEvent) {
        guard
            .log()
            .log(Verbosity::InterruptEvent, &format!("handle {flag}"));
    }
    true
}

/// One level of invocation nesting on the thread executing in a guard's context. The depth is
/// decremented again when this is dropped, unless another thread's record has been installed in
/// the meantime.
pub struct InvocationScope<'a> {
    guard: &'a StackGuard,
    record: u64,
    _dont_send_or_sync_me: PhantomData<*mut ()>,
}

impl<'a> InvocationScope<'a> {
    /// Enter an invocation, failing if that would exceed the guard's maximum nesting depth.
    pub fn enter(guard: &'a StackGuard) -> Result<Self, GuardError> {
        let (depth, record) = guard.enter_nesting();
        let max = guard.config().max_nesting;
        if max != 0 && depth > max {
            guard.exit_nesting(record);
            return Err(GuardError::NestingTooDeep { max });
        }
        Ok(Self {
            guard,
            record,
            _dont_send_or_sync_me: PhantomData,
        })
    }

    /// The nesting depth including this invocation.
    pub fn depth(&self) -> usize {
        self.guard.nesting_depth()
    }
}

impl Drop for InvocationScope<'_> {
    fn drop(&mut self) {
        self.guard.exit_nesting(self.record);
    }
}

/// Run `f` as a nested invocation. Fails without running `f` if the stack has already overflowed
/// or if nesting would become too deep.
pub fn invoke<R>(guard: &StackGuard, f: impl FnOnce() -> R) -> Result<R, GuardError> {
    if StackLimitCheck::new(guard).has_overflowed() {
        guard.stats().stack_overflow();
        guard.log().log(Verbosity::Warning, "stack overflow on invoke");
        return Err(GuardError::StackOverflow);
    }
    let _scope = InvocationScope::enter(guard)?;
    Ok(f())
}
