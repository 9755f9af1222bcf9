//! Errors that a guarded computation can observe.

use thiserror::Error;

/// Why a guarded computation, or an operation on a stack guard, could not continue.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GuardError {
    #[error("Stack overflow")]
    /// The stack pointer went beyond the real stack limit. This is reported in preference to any
    /// pending interrupts and should not be retried.
    StackOverflow,
    #[error("Execution terminated")]
    /// Termination was requested. Every stack check traps with this error until
    /// [crate::StackGuard::cancel_terminate_execution] is called.
    TerminateExecution,
    #[error("Invocations nested more than {max} deep")]
    /// Entering another invocation would exceed the configured maximum nesting depth.
    NestingTooDeep { max: usize },
    #[error("Archive buffer too small: {needed} bytes needed, {got} available")]
    ArchiveTooSmall { needed: usize, got: usize },
    #[error("Invalid archive: {0}")]
    /// The buffer passed to a restore was not produced by an archive of a compatible guard.
    ArchiveInvalid(String),
}
