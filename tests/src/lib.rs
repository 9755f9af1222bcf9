//! Helpers shared by the end-to-end tests and the benchmarks.

use sgrt::{stack_check, GuardError, InterruptHandler, StackGuard};
use std::time::{Duration, Instant};

#[cfg(test)]
mod end_to_end;
#[cfg(test)]
mod handoff;
#[cfg(test)]
mod locks;

/// An [InterruptHandler] that counts how often each of its methods is called.
#[derive(Debug, Default)]
pub struct CountingHandler {
    pub gcs: usize,
    pub debug_breaks: usize,
    pub debug_messages: usize,
    pub preempts: usize,
    pub interrupts: usize,
    pub full_deopts: usize,
    pub installs: usize,
    pub deopt_sites: usize,
    pub ticks: usize,
}

impl InterruptHandler for CountingHandler {
    fn collect_garbage(&mut self) {
        self.gcs += 1;
    }

    fn debug_break(&mut self) {
        self.debug_breaks += 1;
    }

    fn process_debug_messages(&mut self, _debug_command_only: bool) {
        self.debug_messages += 1;
    }

    fn preempt(&mut self) {
        self.preempts += 1;
    }

    fn deopt_marked_allocation_sites(&mut self) {
        self.deopt_sites += 1;
    }

    fn full_deopt(&mut self) {
        self.full_deopts += 1;
    }

    fn install_code(&mut self) {
        self.installs += 1;
    }

    fn interrupt(&mut self) {
        self.interrupts += 1;
    }

    fn optimize_now(&mut self) {
        self.ticks += 1;
    }
}

/// Run stack checks, as a guarded loop would, until `done` returns true or a check fails. Panics
/// if that hasn't happened within 10 seconds.
pub fn check_until<F>(
    guard: &StackGuard,
    handler: &mut CountingHandler,
    mut done: F,
) -> Result<(), GuardError>
where
    F: FnMut(&CountingHandler) -> bool,
{
    let start = Instant::now();
    while !done(handler) {
        stack_check(guard, handler)?;
        if start.elapsed() > Duration::from_secs(10) {
            panic!("Gave up waiting: {handler:?}");
        }
        std::hint::spin_loop();
    }
    Ok(())
}
