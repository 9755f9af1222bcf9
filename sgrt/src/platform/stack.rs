//! Facts about, and measurements of, the native call stack.

use std::hint::black_box;

/// Which direction does the CPU stack grow when more room is required?
#[allow(dead_code)]
#[derive(Debug, PartialEq)]
pub enum StackDirection {
    /// The CPU stack grows "upwards" i.e. growth changes it to a higher address.
    GrowsToHigherAddress,
    /// The CPU stack grows "downwards" i.e. growth changes it to a lower address.
    GrowsToLowerAddress,
}

/// Every target we support grows its stack downwards: the stack guard's limits are lower bounds.
pub const STACK_DIRECTION: StackDirection = StackDirection::GrowsToLowerAddress;

/// Return an approximation of the current stack pointer: the address of a local in a frame that
/// is never inlined.
#[inline(never)]
pub fn current_stack_position() -> usize {
    let marker = 0u8;
    black_box(&marker) as *const u8 as usize
}

/// Return a stack limit `size` bytes below the current stack position. If the stack is not that
/// deep, the limit is clamped to the lowest address that is still a sensible limit.
pub fn default_stack_limit(size: usize) -> usize {
    debug_assert_eq!(STACK_DIRECTION, StackDirection::GrowsToLowerAddress);
    // Address 0 is never a valid stack address, and a limit of 0 would mean "never overflows".
    current_stack_position().saturating_sub(size).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    fn deeper(n: usize) -> usize {
        if n == 0 {
            current_stack_position()
        } else {
            black_box(deeper(n - 1))
        }
    }

    #[test]
    fn stack_grows_down() {
        let here = current_stack_position();
        assert!(deeper(16) < here);
    }

    #[test]
    fn limit_below_current_position() {
        let limit = default_stack_limit(64 * 1024);
        assert!(limit < current_stack_position());
        assert_eq!(default_stack_limit(usize::MAX), 1);
    }
}
