use super::StackGuard;
use crate::platform::current_stack_position;

/// The lock-free stack checks that guarded code performs.
///
/// [StackLimitCheck::should_trap] is the check to place at function entries and loop back edges:
/// it fails both when the stack has overflowed and when an interrupt is armed. Once it fails,
/// hand over to [crate::handle_stack_guard_interrupt] to find out which.
/// [StackLimitCheck::has_overflowed] ignores interrupts, and is for native code that only cares
/// about running out of stack.
#[derive(Clone, Copy)]
pub struct StackLimitCheck<'a> {
    guard: &'a StackGuard,
}

impl<'a> StackLimitCheck<'a> {
    pub fn new(guard: &'a StackGuard) -> Self {
        Self { guard }
    }

    #[inline]
    pub fn has_overflowed(&self) -> bool {
        self.has_overflowed_at(current_stack_position())
    }

    /// Is `sp` beyond the real native limit?
    #[inline]
    pub fn has_overflowed_at(&self, sp: usize) -> bool {
        sp < self.guard.real_native_limit()
    }

    #[inline]
    pub fn should_trap(&self) -> bool {
        self.should_trap_at(current_stack_position())
    }

    /// Does `sp` fail the comparison against the effective language-level limit?
    #[inline]
    pub fn should_trap_at(&self, sp: usize) -> bool {
        sp < self.guard.js_limit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack_guard::{test_guard, GuardConfig};

    #[test]
    fn traps() {
        let g = test_guard(GuardConfig::default());
        let check = StackLimitCheck::new(&g);
        assert!(!check.should_trap());
        assert!(!check.has_overflowed());
        g.set_stack_limit(0x10_000);
        assert!(check.should_trap_at(0xf_fff));
        assert!(!check.should_trap_at(0x10_000));
        assert!(check.has_overflowed_at(0xf_fff));

        g.preempt();
        // An armed interrupt traps at any position, but isn't an overflow.
        assert!(check.should_trap());
        assert!(check.should_trap_at(0x10_000));
        assert!(!check.has_overflowed());
        assert!(!check.has_overflowed_at(0x10_000));
    }
}
