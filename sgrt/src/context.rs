//! Execution contexts, and handing them between threads.
//!
//! An [ExecutionContext] can be used by many threads, but only one at a time executes in it. A
//! thread gains the right to execute by [entering](ExecutionContext::enter) the context, which
//! blocks while another thread is inside. When a thread leaves for the last time, its guard state
//! (stack limits, nesting depth, pending interrupts) is archived so that the next thread starts
//! afresh, and is restored when the first thread re-enters.

use crate::{
    log::{stats::Stats, Log, Verbosity},
    platform::{LazyInstance, RecursiveMutex},
    stack_guard::{GuardConfig, StackGuard, ARCHIVE_SPACE_PER_THREAD, DEFAULT_STACK_SIZE_KB},
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    env,
    error::Error,
    marker::PhantomData,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, ThreadId},
};

/// Configure an [ExecutionContext].
pub struct ContextBuilder {
    stack_size: usize,
    max_nesting: usize,
}

impl ContextBuilder {
    /// Create a builder from the environment. `SG_STACK_SIZE` sets the stack size in KiB and
    /// `SG_MAX_NESTING` the maximum invocation nesting depth (`0` meaning unbounded). Either being
    /// set to something that isn't a non-negative integer is an error.
    pub fn new() -> Result<Self, Box<dyn Error>> {
        let stack_size = match env::var("SG_STACK_SIZE") {
            Ok(s) => s
                .parse::<usize>()
                .ok()
                .and_then(|kb| kb.checked_mul(1024))
                .ok_or_else(|| format!("Invalid SG_STACK_SIZE '{s}'"))?,
            Err(_) => DEFAULT_STACK_SIZE_KB * 1024,
        };
        let max_nesting = match env::var("SG_MAX_NESTING") {
            Ok(s) => s
                .parse::<usize>()
                .map_err(|e| format!("Invalid SG_MAX_NESTING '{s}': {e}"))?,
            Err(_) => 0,
        };
        Ok(Self {
            stack_size,
            max_nesting,
        })
    }

    /// How many bytes of stack, below the position at which a thread first enters the context,
    /// may guarded code use?
    pub fn stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// The maximum depth of nested invocations. `0` means unbounded.
    pub fn max_nesting(mut self, max_nesting: usize) -> Self {
        self.max_nesting = max_nesting;
        self
    }

    /// Consume the builder and create an [ExecutionContext].
    pub fn build(self) -> Result<Arc<ExecutionContext>, Box<dyn Error>> {
        Ok(Arc::new(self.build_context()?))
    }

    fn build_context(self) -> Result<ExecutionContext, Box<dyn Error>> {
        if self.stack_size == 0 {
            return Err("Stack size must be non-zero".into());
        }
        let log = Arc::new(Log::new()?);
        let stats = Arc::new(Stats::new());
        let config = GuardConfig {
            stack_size: self.stack_size,
            max_nesting: self.max_nesting,
        };
        Ok(ExecutionContext {
            stack_guard: StackGuard::with_log(config, Arc::clone(&log), Arc::clone(&stats)),
            locker: RecursiveMutex::new(),
            entries: AtomicUsize::new(0),
            detaching: AtomicBool::new(false),
            archives: Mutex::new(HashMap::new()),
            log,
            stats,
        })
    }
}

static GLOBAL: LazyInstance<ExecutionContext> = LazyInstance::new(|| {
    match ContextBuilder::new().and_then(ContextBuilder::build_context) {
        Ok(ctx) => ctx,
        Err(e) => panic!("Can't create the global execution context: {e}"),
    }
});

/// A context that threads take turns to execute in, and the [StackGuard] that they share.
pub struct ExecutionContext {
    stack_guard: StackGuard,
    /// Held by the thread executing in this context, once per [ContextThread] it has.
    locker: RecursiveMutex,
    /// How many [ContextThread]s does the thread holding `locker` have? Only that thread touches
    /// this.
    entries: AtomicUsize,
    /// Should the thread holding `locker` discard, rather than archive, its guard state when it
    /// leaves? Only that thread touches this.
    detaching: AtomicBool,
    /// The archived guard state of threads which have left this context.
    archives: Mutex<HashMap<ThreadId, Box<[u8]>>>,
    log: Arc<Log>,
    stats: Arc<Stats>,
}

impl ExecutionContext {
    /// The process-wide context, configured from the environment the first time it's used.
    ///
    /// # Panics
    ///
    /// If the environment holds an invalid configuration.
    pub fn global() -> &'static ExecutionContext {
        GLOBAL.pointer()
    }

    pub fn stack_guard(&self) -> &StackGuard {
        &self.stack_guard
    }

    /// Enter this context, blocking until no other thread is executing in it. A thread that is
    /// already inside may enter again.
    pub fn enter(&self) -> ContextThread<'_> {
        self.locker.lock();
        if self.entries.fetch_add(1, Ordering::Relaxed) == 0 {
            self.thread_in();
        }
        ContextThread {
            ctx: self,
            _dont_send_or_sync_me: PhantomData,
        }
    }

    /// Is the calling thread currently inside this context?
    pub fn is_entered(&self) -> bool {
        self.locker.is_owned_by_current_thread()
    }

    /// Write out the statistics gathered so far, if `SGD_LOG_STATS` is set. They are also written
    /// when the last user of a context's statistics is dropped, which never happens for
    /// [ExecutionContext::global]: call this at teardown to see its statistics.
    pub fn output_stats(&self) {
        self.stats.output();
    }

    /// How many threads have archived guard state in this context?
    pub fn archived_threads(&self) -> usize {
        self.archives.lock().len()
    }

    fn thread_in(&self) {
        let tid = thread::current().id();
        let archived = self.archives.lock().remove(&tid);
        if let Some(buf) = archived {
            // We wrote `buf` ourselves in `thread_out`.
            match unsafe { self.stack_guard.restore(&buf) } {
                Ok(_) => return,
                Err(e) => self
                    .log
                    .log(Verbosity::Error, &format!("restoring {tid:?}: {e}")),
            }
        }
        self.stack_guard.access().init_thread();
        if self.log.enabled(Verbosity::ThreadEvent) {
            self.log.log(
                Verbosity::ThreadEvent,
                &format!(
                    "init {tid:?} with stack limit {:#x}",
                    self.stack_guard.real_js_limit()
                ),
            );
        }
    }

    fn thread_out(&self) {
        if self.detaching.swap(false, Ordering::Relaxed) {
            self.stack_guard.access().clear_thread();
            self.log.log(Verbosity::ThreadEvent, "detach");
            return;
        }
        let mut buf = vec![0; ARCHIVE_SPACE_PER_THREAD].into_boxed_slice();
        match self.stack_guard.archive(&mut buf) {
            Ok(_) => {
                self.archives.lock().insert(thread::current().id(), buf);
            }
            Err(e) => self.log.log(Verbosity::Error, &format!("archiving: {e}")),
        }
    }
}

/// A thread's right to execute in an [ExecutionContext]. The context is left when this is
/// dropped. This struct is neither `Send` nor `Sync`: it must be dropped by the thread that
/// entered.
#[must_use = "if unused the context will be left immediately"]
pub struct ContextThread<'a> {
    ctx: &'a ExecutionContext,
    // Raw pointers are neither send nor sync.
    _dont_send_or_sync_me: PhantomData<*mut ()>,
}

impl<'a> ContextThread<'a> {
    pub fn context(&self) -> &'a ExecutionContext {
        self.ctx
    }

    /// The context's guard. Scopes opened on it, such as [StackGuard::postpone_interrupts] and
    /// [crate::InvocationScope], borrow this `ContextThread` and so can't outlive the thread's
    /// turn in the context.
    pub fn stack_guard(&self) -> &StackGuard {
        &self.ctx.stack_guard
    }

    /// Leave the context and, once this thread's outermost entry has been left, discard its guard
    /// state instead of archiving it. The next time this thread enters, it starts afresh.
    pub fn detach(self) {
        self.ctx.detaching.store(true, Ordering::Relaxed);
    }
}

impl Drop for ContextThread<'_> {
    fn drop(&mut self) {
        if self.ctx.entries.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.ctx.thread_out();
        }
        // We locked `locker` in `ExecutionContext::enter`.
        unsafe { self.ctx.locker.unlock() };
    }
}
