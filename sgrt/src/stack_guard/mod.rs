//! The per-context stack guard.
//!
//! Guarded code checks for stack overflow by comparing the stack pointer against a limit (see
//! [StackLimitCheck]). Because the stack grows down, the check fails when `sp < limit`. To interrupt
//! running code from another thread, the guard overwrites the limit with [INTERRUPT_LIMIT], a
//! value above any real stack address, so the very next check fails. The trap handler then asks
//! the guard which case it's in: a genuine overflow, or one or more pending [InterruptFlag]s.
//!
//! The limits are read lock-free by the fast path. Everything else, including writes to the
//! limits, happens while holding the guard's lock, witnessed by an [ExecutionAccess] token.

use crate::{
    errors::GuardError,
    log::{stats::Stats, Log, Verbosity},
    platform::{stack::default_stack_limit, LockGuard, Mutex},
};
use libc::c_void;
use std::{
    cell::UnsafeCell,
    fmt, ptr,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};
use strum::{EnumCount, EnumIter, FromRepr, IntoEnumIterator};

mod check;
mod postpone;
mod thread_local;

pub use check::StackLimitCheck;
pub use postpone::PostponeInterruptsScope;
pub use thread_local::ARCHIVE_SPACE_PER_THREAD;
use thread_local::ThreadLocal;

/// The value effective limits are set to when an interrupt is armed. Every stack check fails
/// against it.
pub const INTERRUPT_LIMIT: usize = usize::MAX - 1;

/// The value all limits are set to when no thread's state is installed in a guard.
pub const ILLEGAL_LIMIT: usize = usize::MAX - 7;

/// Each thread record installed by [ExecutionAccess::init_thread] gets a fresh, non-zero, id. A
/// vacant guard's record id is 0.
static NEXT_RECORD: AtomicU64 = AtomicU64::new(1);

/// The default size, in KiB, of the stack region a thread is given when it's initialised.
pub const DEFAULT_STACK_SIZE_KB: usize = 984;

/// The reasons guarded code can be interrupted. Each is one bit in an [InterruptFlags] set.
#[repr(u32)]
#[derive(
    Copy, Clone, Debug, strum::Display, EnumCount, EnumIter, FromRepr, PartialEq, Eq, Hash,
)]
#[strum(serialize_all = "snake_case")]
pub enum InterruptFlag {
    Interrupt,
    DebugBreak,
    DebugCommand,
    Preempt,
    Terminate,
    GcRequest,
    FullDeopt,
    InstallCode,
    ApiInterrupt,
    DeoptMarkedAllocationSites,
}

impl InterruptFlag {
    /// This flag's bit in an [InterruptFlags] set.
    pub const fn bit(self) -> u32 {
        1 << self as u32
    }
}

/// A set of [InterruptFlag]s.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct InterruptFlags(u32);

impl InterruptFlags {
    const ALL_BITS: u32 = (1 << InterruptFlag::COUNT) - 1;

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build a set from raw bits, returning `None` if `bits` names a flag that doesn't exist.
    pub const fn from_bits(bits: u32) -> Option<Self> {
        if bits & !Self::ALL_BITS == 0 {
            Some(Self(bits))
        } else {
            None
        }
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, flag: InterruptFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub fn insert(&mut self, flag: InterruptFlag) {
        self.0 |= flag.bit();
    }

    pub fn remove(&mut self, flag: InterruptFlag) {
        self.0 &= !flag.bit();
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Iterate over the flags in this set, in declaration order.
    pub fn iter(self) -> impl Iterator<Item = InterruptFlag> {
        InterruptFlag::iter().filter(move |f| self.contains(*f))
    }
}

impl fmt::Debug for InterruptFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<InterruptFlag> for InterruptFlags {
    fn from_iter<I: IntoIterator<Item = InterruptFlag>>(iter: I) -> Self {
        let mut flags = Self::empty();
        for f in iter {
            flags.insert(f);
        }
        flags
    }
}

/// A callback registered with [StackGuard::request_interrupt]. It's called, with the data pointer
/// it was registered with, on the thread executing in the guard's context.
pub type InterruptCallback = extern "C" fn(data: *mut c_void);

/// The data pointer registered alongside an [InterruptCallback].
#[derive(Clone, Copy, Debug)]
pub(crate) struct CallbackData(pub(crate) *mut c_void);

// We never dereference the pointer: it's only ever handed back to the callback it was registered
// with, and the registrant promises that's safe on whichever thread runs the callback.
unsafe impl Send for CallbackData {}

/// How a [StackGuard] sets up a thread.
#[derive(Clone, Copy, Debug)]
pub struct GuardConfig {
    /// How many bytes of stack, below the position at which a thread is initialised, may guarded
    /// code use?
    pub stack_size: usize,
    /// The maximum depth of nested invocations. `0` means unbounded.
    pub max_nesting: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE_KB * 1024,
            max_nesting: 0,
        }
    }
}

/// The state that may only be read or written while holding the guard's lock.
struct Locked {
    postpone_interrupts_nesting: usize,
    interrupt_flags: InterruptFlags,
    interrupt_callback: Option<InterruptCallback>,
    interrupt_callback_data: CallbackData,
}

/// Proof that the holder has exclusive access to a [StackGuard]'s locked state. Created by
/// [StackGuard::access]; the lock is released when this is dropped.
///
/// The lock isn't recursive: calling any other locking method on the same guard while holding an
/// `ExecutionAccess` for it deadlocks.
pub struct ExecutionAccess<'a> {
    guard: &'a StackGuard,
    _lock: LockGuard<'a, Mutex>,
}

impl<'a> ExecutionAccess<'a> {
    /// Is this token for `guard`?
    pub fn is_for(&self, guard: &StackGuard) -> bool {
        ptr::eq(self.guard, guard)
    }

    fn locked(&self) -> &Locked {
        // We hold `guard.access_mutex`, so nobody else can be writing.
        unsafe { &*self.guard.locked.get() }
    }

    fn locked_mut(&mut self) -> &mut Locked {
        // We hold `guard.access_mutex` and `&mut self` means nobody else can use this token.
        unsafe { &mut *self.guard.locked.get() }
    }

    /// Set the guard this token is for up for the calling thread. If no thread's limits are
    /// installed, the real limits are set to [GuardConfig::stack_size] bytes below the current
    /// stack position. Nesting and postponement are reset, so any [PostponeInterruptsScope] or
    /// [crate::InvocationScope] still open against the previous record no longer has an effect.
    /// Pending interrupts are kept.
    pub fn init_thread(&mut self) {
        let guard = self.guard;
        let mut tl = guard.snapshot(self);
        if tl.is_vacant() {
            let limit = default_stack_limit(guard.config.stack_size);
            tl.real_jslimit = limit;
            tl.real_climit = limit;
        }
        tl.record = NEXT_RECORD.fetch_add(1, Ordering::Relaxed);
        tl.nesting = 0;
        tl.postpone_interrupts_nesting = 0;
        tl.rearm();
        guard.install(self, &tl);
    }

    /// Discard all of the state installed in the guard this token is for, including any pending
    /// interrupts.
    pub fn clear_thread(&mut self) {
        let guard = self.guard;
        guard.install(self, &ThreadLocal::cleared());
    }
}

/// The interrupt and stack-limit state for one execution context.
pub struct StackGuard {
    access_mutex: Mutex,
    // The limits are read without the lock by the fast path but only written with it held.
    real_jslimit: AtomicUsize,
    jslimit: AtomicUsize,
    real_climit: AtomicUsize,
    climit: AtomicUsize,
    /// How deeply nested are invocations on the thread executing in this context? Only written
    /// with the lock held.
    nesting: AtomicUsize,
    /// The id of the installed thread record. Scopes remember it so that a scope which outlives
    /// its thread's turn can't touch the next thread's counters.
    record: AtomicU64,
    locked: UnsafeCell<Locked>,
    config: GuardConfig,
    log: Arc<Log>,
    stats: Arc<Stats>,
}

// `locked` is only accessed through an `ExecutionAccess`, which holds `access_mutex`.
unsafe impl Sync for StackGuard {}

impl StackGuard {
    /// Create a guard with no thread's state installed.
    pub fn new(config: GuardConfig) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self::with_log(config, Arc::new(Log::new()?), Arc::new(Stats::new())))
    }

    pub(crate) fn with_log(config: GuardConfig, log: Arc<Log>, stats: Arc<Stats>) -> Self {
        let tl = ThreadLocal::cleared();
        Self {
            access_mutex: Mutex::new(),
            real_jslimit: AtomicUsize::new(tl.real_jslimit),
            jslimit: AtomicUsize::new(tl.jslimit),
            real_climit: AtomicUsize::new(tl.real_climit),
            climit: AtomicUsize::new(tl.climit),
            nesting: AtomicUsize::new(tl.nesting),
            record: AtomicU64::new(tl.record),
            locked: UnsafeCell::new(Locked {
                postpone_interrupts_nesting: tl.postpone_interrupts_nesting,
                interrupt_flags: tl.interrupt_flags,
                interrupt_callback: tl.interrupt_callback,
                interrupt_callback_data: tl.interrupt_callback_data,
            }),
            config,
            log,
            stats,
        }
    }

    /// Acquire this guard's lock.
    pub fn access(&self) -> ExecutionAccess<'_> {
        ExecutionAccess {
            guard: self,
            _lock: LockGuard::new(&self.access_mutex),
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub(crate) fn log(&self) -> &Log {
        &self.log
    }

    pub(crate) fn stats(&self) -> &Stats {
        &self.stats
    }

    // Limits

    /// The effective language-level limit: what the fast path compares against.
    #[inline]
    pub fn js_limit(&self) -> usize {
        self.jslimit.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn real_js_limit(&self) -> usize {
        self.real_jslimit.load(Ordering::Relaxed)
    }

    /// The effective native limit.
    #[inline]
    pub fn native_limit(&self) -> usize {
        self.climit.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn real_native_limit(&self) -> usize {
        self.real_climit.load(Ordering::Relaxed)
    }

    /// The address of the effective language-level limit, for generated code that loads it
    /// directly. It's valid for as long as this guard is.
    pub fn address_of_js_limit(&self) -> *const usize {
        self.jslimit.as_ptr() as *const usize
    }

    /// Set the real limits to `limit`. The effective limits follow unless an interrupt is armed,
    /// in which case they stay armed and the new limit takes effect once it's handled.
    pub fn set_stack_limit(&self, limit: usize) {
        debug_assert!(limit < ILLEGAL_LIMIT);
        let access = self.access();
        for (real, effective) in [
            (&self.real_jslimit, &self.jslimit),
            (&self.real_climit, &self.climit),
        ] {
            if effective.load(Ordering::Relaxed) == real.load(Ordering::Relaxed) {
                effective.store(limit, Ordering::Relaxed);
            }
            real.store(limit, Ordering::Relaxed);
        }
        drop(access);
        if self.log.enabled(Verbosity::ThreadEvent) {
            self.log
                .log(Verbosity::ThreadEvent, &format!("stack limit {limit:#x}"));
        }
    }

    fn set_interrupt_limits(&self, _access: &ExecutionAccess<'_>) {
        self.jslimit.store(INTERRUPT_LIMIT, Ordering::Relaxed);
        self.climit.store(INTERRUPT_LIMIT, Ordering::Relaxed);
    }

    fn reset_limits(&self, _access: &ExecutionAccess<'_>) {
        self.jslimit
            .store(self.real_jslimit.load(Ordering::Relaxed), Ordering::Relaxed);
        self.climit
            .store(self.real_climit.load(Ordering::Relaxed), Ordering::Relaxed);
    }

    /// Did the last trap happen because the stack genuinely overflowed? That's the case when
    /// neither effective limit is armed for an interrupt.
    pub fn is_stack_overflow(&self) -> bool {
        let _access = self.access();
        self.js_limit() != INTERRUPT_LIMIT && self.native_limit() != INTERRUPT_LIMIT
    }

    // Interrupts

    /// Request `flag`. Unless interrupts are postponed, this arms the limits so that the thread
    /// executing in this context traps at its next stack check. Requesting an already pending
    /// flag has no further effect.
    pub fn request(&self, flag: InterruptFlag) {
        let armed = {
            let mut access = self.access();
            self.request_locked(&mut access, flag)
        };
        self.stats.interrupt_requested(flag);
        if self.log.enabled(Verbosity::InterruptEvent) {
            let postponed = if armed { "" } else { " (postponed)" };
            self.log.log(
                Verbosity::InterruptEvent,
                &format!("request {flag}{postponed}"),
            );
        }
    }

    fn request_locked(&self, access: &mut ExecutionAccess<'_>, flag: InterruptFlag) -> bool {
        access.locked_mut().interrupt_flags.insert(flag);
        if access.locked().postpone_interrupts_nesting > 0 {
            false
        } else {
            self.set_interrupt_limits(access);
            true
        }
    }

    /// Is `flag` pending?
    pub fn is_set(&self, flag: InterruptFlag) -> bool {
        self.access().locked().interrupt_flags.contains(flag)
    }

    /// Clear `flag`. If that leaves nothing pending, and interrupts aren't postponed, the effective
    /// limits go back to the real limits.
    pub fn continue_after(&self, flag: InterruptFlag) {
        let mut access = self.access();
        self.continue_locked(&mut access, flag);
    }

    fn continue_locked(&self, access: &mut ExecutionAccess<'_>, flag: InterruptFlag) {
        let locked = access.locked_mut();
        locked.interrupt_flags.remove(flag);
        if locked.postpone_interrupts_nesting == 0 && locked.interrupt_flags.is_empty() {
            self.reset_limits(access);
        }
    }

    /// The set of pending interrupts.
    pub fn pending(&self) -> InterruptFlags {
        self.access().locked().interrupt_flags
    }

    pub fn interrupt(&self) {
        self.request(InterruptFlag::Interrupt);
    }

    pub fn is_interrupted(&self) -> bool {
        self.is_set(InterruptFlag::Interrupt)
    }

    pub fn debug_break(&self) {
        self.request(InterruptFlag::DebugBreak);
    }

    pub fn is_debug_break(&self) -> bool {
        self.is_set(InterruptFlag::DebugBreak)
    }

    pub fn debug_command(&self) {
        self.request(InterruptFlag::DebugCommand);
    }

    pub fn is_debug_command(&self) -> bool {
        self.is_set(InterruptFlag::DebugCommand)
    }

    pub fn preempt(&self) {
        self.request(InterruptFlag::Preempt);
    }

    pub fn is_preempted(&self) -> bool {
        self.is_set(InterruptFlag::Preempt)
    }

    /// Ask the thread executing in this context to stop. Stack checks keep trapping with
    /// [GuardError::TerminateExecution] until [StackGuard::cancel_terminate_execution] is called.
    pub fn terminate_execution(&self) {
        self.request(InterruptFlag::Terminate);
    }

    pub fn is_terminate_execution(&self) -> bool {
        self.is_set(InterruptFlag::Terminate)
    }

    pub fn cancel_terminate_execution(&self) {
        self.continue_after(InterruptFlag::Terminate);
        self.log.log(Verbosity::InterruptEvent, "cancel terminate");
    }

    pub fn request_gc(&self) {
        self.request(InterruptFlag::GcRequest);
    }

    pub fn is_gc_request(&self) -> bool {
        self.is_set(InterruptFlag::GcRequest)
    }

    pub fn full_deopt(&self) {
        self.request(InterruptFlag::FullDeopt);
    }

    pub fn is_full_deopt(&self) -> bool {
        self.is_set(InterruptFlag::FullDeopt)
    }

    pub fn request_install_code(&self) {
        self.request(InterruptFlag::InstallCode);
    }

    pub fn is_install_code(&self) -> bool {
        self.is_set(InterruptFlag::InstallCode)
    }

    pub fn deopt_marked_allocation_sites(&self) {
        self.request(InterruptFlag::DeoptMarkedAllocationSites);
    }

    pub fn is_deopt_marked_allocation_sites(&self) -> bool {
        self.is_set(InterruptFlag::DeoptMarkedAllocationSites)
    }

    /// Register `callback` to be called, with `data`, on the thread executing in this context,
    /// and request [InterruptFlag::ApiInterrupt]. Only one callback can be pending: a second
    /// request before the first is invoked replaces it.
    pub fn request_interrupt(&self, callback: InterruptCallback, data: *mut c_void) {
        let replaced = {
            let mut access = self.access();
            let locked = access.locked_mut();
            let replaced = locked.interrupt_callback.replace(callback).is_some();
            locked.interrupt_callback_data = CallbackData(data);
            self.request_locked(&mut access, InterruptFlag::ApiInterrupt);
            replaced
        };
        self.stats.interrupt_requested(InterruptFlag::ApiInterrupt);
        if replaced {
            self.log.log(
                Verbosity::Warning,
                "interrupt callback replaced before it was invoked",
            );
        }
        self.log
            .log(Verbosity::InterruptEvent, "request api_interrupt");
    }

    pub fn is_api_interrupt(&self) -> bool {
        self.is_set(InterruptFlag::ApiInterrupt)
    }

    /// Discard any pending interrupt callback and clear [InterruptFlag::ApiInterrupt].
    pub fn clear_interrupt(&self) {
        let mut access = self.access();
        let locked = access.locked_mut();
        locked.interrupt_callback = None;
        locked.interrupt_callback_data = CallbackData(ptr::null_mut());
        self.continue_locked(&mut access, InterruptFlag::ApiInterrupt);
    }

    /// Take the pending interrupt callback, if any, and call it. The callback is called without
    /// the guard's lock held, so it may itself use the guard.
    pub fn invoke_interrupt_callback(&self) {
        let taken = {
            let mut access = self.access();
            let locked = access.locked_mut();
            let data = locked.interrupt_callback_data;
            locked.interrupt_callback_data = CallbackData(ptr::null_mut());
            locked.interrupt_callback.take().map(|cb| (cb, data))
        };
        if let Some((cb, data)) = taken {
            cb(data.0);
        }
    }

    // Postponement

    /// Should interrupts be held back rather than dispatched?
    pub fn should_postpone_interrupts(&self) -> bool {
        self.access().locked().postpone_interrupts_nesting > 0
    }

    /// Postpone interrupts until the returned scope, and any others, are dropped.
    pub fn postpone_interrupts(&self) -> PostponeInterruptsScope<'_> {
        PostponeInterruptsScope::new(self)
    }

    /// Enter a postponement scope, returning the id of the record it applies to.
    pub(crate) fn enter_postpone(&self) -> u64 {
        let mut access = self.access();
        access.locked_mut().postpone_interrupts_nesting += 1;
        self.reset_limits(&access);
        self.record.load(Ordering::Relaxed)
    }

    /// Leave a postponement scope entered against record `record`, returning `true` if that
    /// re-armed the limits for interrupts which were requested while postponed. If `record` is no
    /// longer installed, nothing changes.
    pub(crate) fn exit_postpone(&self, record: u64) -> bool {
        let mut access = self.access();
        if !self.record_installed(&access, record) {
            drop(access);
            self.log.log(
                Verbosity::Error,
                "postponement scope dropped after its thread left the context",
            );
            return false;
        }
        let locked = access.locked_mut();
        let Some(depth) = locked.postpone_interrupts_nesting.checked_sub(1) else {
            drop(access);
            self.log
                .log(Verbosity::Error, "postponement scope exited more than entered");
            return false;
        };
        locked.postpone_interrupts_nesting = depth;
        if depth == 0 && !locked.interrupt_flags.is_empty() {
            self.set_interrupt_limits(&access);
            true
        } else {
            false
        }
    }

    /// Is `record` the installed record? Installing any record resets the counters, so a scope
    /// opened while the guard was vacant stays valid until a thread's record is installed.
    fn record_installed(&self, _access: &ExecutionAccess<'_>, record: u64) -> bool {
        self.record.load(Ordering::Relaxed) == record
    }

    /// If interrupts are postponed, put the limits back to their real values (a request may have
    /// armed them between the check and now) and return `true`.
    pub(crate) fn disarm_if_postponed(&self) -> bool {
        let access = self.access();
        if access.locked().postpone_interrupts_nesting > 0 {
            self.reset_limits(&access);
            true
        } else {
            false
        }
    }

    // Nesting

    /// How deeply nested are invocations on the thread executing in this context?
    pub fn nesting_depth(&self) -> usize {
        self.nesting.load(Ordering::Relaxed)
    }

    /// Enter one level of invocation, returning the new depth and the id of the record it
    /// applies to.
    pub(crate) fn enter_nesting(&self) -> (usize, u64) {
        let _access = self.access();
        let depth = self.nesting.load(Ordering::Relaxed) + 1;
        self.nesting.store(depth, Ordering::Relaxed);
        (depth, self.record.load(Ordering::Relaxed))
    }

    /// Leave one level of invocation entered against record `record`. If `record` is no longer
    /// installed, nothing changes.
    pub(crate) fn exit_nesting(&self, record: u64) {
        let access = self.access();
        if !self.record_installed(&access, record) {
            drop(access);
            self.log.log(
                Verbosity::Error,
                "invocation scope dropped after its thread left the context",
            );
            return;
        }
        match self.nesting.load(Ordering::Relaxed).checked_sub(1) {
            Some(depth) => self.nesting.store(depth, Ordering::Relaxed),
            None => {
                drop(access);
                self.log
                    .log(Verbosity::Error, "invocation scope exited more than entered");
            }
        }
    }

    // Thread lifecycle

    /// Copy out the state currently installed.
    fn snapshot(&self, access: &ExecutionAccess<'_>) -> ThreadLocal {
        let locked = access.locked();
        ThreadLocal {
            real_jslimit: self.real_jslimit.load(Ordering::Relaxed),
            jslimit: self.jslimit.load(Ordering::Relaxed),
            real_climit: self.real_climit.load(Ordering::Relaxed),
            climit: self.climit.load(Ordering::Relaxed),
            nesting: self.nesting.load(Ordering::Relaxed),
            record: self.record.load(Ordering::Relaxed),
            postpone_interrupts_nesting: locked.postpone_interrupts_nesting,
            interrupt_flags: locked.interrupt_flags,
            interrupt_callback: locked.interrupt_callback,
            interrupt_callback_data: locked.interrupt_callback_data,
        }
    }

    fn install(&self, access: &mut ExecutionAccess<'_>, tl: &ThreadLocal) {
        self.real_jslimit.store(tl.real_jslimit, Ordering::Relaxed);
        self.jslimit.store(tl.jslimit, Ordering::Relaxed);
        self.real_climit.store(tl.real_climit, Ordering::Relaxed);
        self.climit.store(tl.climit, Ordering::Relaxed);
        self.nesting.store(tl.nesting, Ordering::Relaxed);
        self.record.store(tl.record, Ordering::Relaxed);
        let locked = access.locked_mut();
        locked.postpone_interrupts_nesting = tl.postpone_interrupts_nesting;
        locked.interrupt_flags = tl.interrupt_flags;
        locked.interrupt_callback = tl.interrupt_callback;
        locked.interrupt_callback_data = tl.interrupt_callback_data;
    }

    /// Write the installed state into `to`, leaving this guard vacant. Returns the number of
    /// bytes written, which is always [ARCHIVE_SPACE_PER_THREAD].
    pub fn archive(&self, to: &mut [u8]) -> Result<usize, GuardError> {
        let n = {
            let mut access = self.access();
            let n = self.snapshot(&access).archive(to)?;
            self.install(&mut access, &ThreadLocal::cleared());
            n
        };
        self.stats.thread_archived();
        self.log.log(Verbosity::ThreadEvent, "archive");
        Ok(n)
    }

    /// Install the state previously written into `from` by [StackGuard::archive]. Interrupts
    /// requested while this guard was vacant are kept. Returns the number of bytes read.
    ///
    /// # Safety
    ///
    /// `from` must have been written by [StackGuard::archive] in this process.
    pub unsafe fn restore(&self, from: &[u8]) -> Result<usize, GuardError> {
        let (mut tl, n) = unsafe { ThreadLocal::restore(from) }?;
        {
            let mut access = self.access();
            let current = self.snapshot(&access);
            if current.is_vacant() {
                tl.adopt_requests(&current);
            }
            tl.rearm();
            self.install(&mut access, &tl);
        }
        self.stats.thread_restored();
        self.log.log(Verbosity::ThreadEvent, "restore");
        Ok(n)
    }
}

impl fmt::Debug for StackGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackGuard")
            .field("jslimit", &format_args!("{:#x}", self.js_limit()))
            .field("real_jslimit", &format_args!("{:#x}", self.real_js_limit()))
            .field("climit", &format_args!("{:#x}", self.native_limit()))
            .field("real_climit", &format_args!("{:#x}", self.real_native_limit()))
            .field("nesting", &self.nesting_depth())
            .finish()
    }
}

/// A guard set up for the calling thread.
#[cfg(test)]
pub(crate) fn test_guard(config: GuardConfig) -> StackGuard {
    let g = StackGuard::with_log(config, Arc::new(Log::new().unwrap()), Arc::new(Stats::new()));
    g.access().init_thread();
    g
}
