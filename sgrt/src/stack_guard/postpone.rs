use super::StackGuard;
use crate::log::Verbosity;
use std::marker::PhantomData;

/// While at least one `PostponeInterruptsScope` is alive for a guard, interrupts requested of that
/// guard are recorded but don't arm its limits. When the outermost scope is dropped, the limits
/// are armed if anything was requested in the meantime.
///
/// A scope must be dropped on the thread that created it, and scopes must be dropped in the
/// reverse order they were created.
///
/// A scope only applies to the thread record that was installed when it was created: if it is
/// dropped while another thread's record is installed, nothing happens.
pub struct PostponeInterruptsScope<'a> {
    guard: &'a StackGuard,
    record: u64,
    _dont_send_or_sync_me: PhantomData<*mut ()>,
}

impl<'a> PostponeInterruptsScope<'a> {
    pub(crate) fn new(guard: &'a StackGuard) -> Self {
        let record = guard.enter_postpone();
        Self {
            guard,
            record,
            _dont_send_or_sync_me: PhantomData,
        }
    }
}

impl Drop for PostponeInterruptsScope<'_> {
    fn drop(&mut self) {
        if self.guard.exit_postpone(self.record) {
            self.guard
                .log()
                .log(Verbosity::InterruptEvent, "postponed interrupts armed");
        }
    }
}
