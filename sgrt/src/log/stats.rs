//! This module records statistics about how often interrupts are requested and handled. In
//! non-testing mode, this is only enabled if the end user defines the environment variable
//! `SGD_LOG_STATS`. In testing mode, this is always enabled, with output being sent to `stderr`.

use crate::stack_guard::InterruptFlag;
use parking_lot::Mutex;
#[cfg(not(test))]
use std::env;
use std::{fs, ops::DerefMut};
use strum::{EnumCount, IntoEnumIterator};

pub(crate) struct Stats {
    // Most runs won't want statistics, so the common case must be the quickest possible check for
    // "are any stats to be recorded?": only if they are do we have to lock a `Mutex`.
    inner: Option<Mutex<StatsInner>>,
}

struct StatsInner {
    /// The path to write output. If exactly equal to `-`, output will be written to stderr.
    output_path: String,
    /// How often has each [InterruptFlag] been requested?
    requested: [u64; InterruptFlag::COUNT],
    /// How often has each [InterruptFlag] been dispatched by the interrupt handler?
    handled: [u64; InterruptFlag::COUNT],
    /// How many traps were genuine stack overflows?
    stack_overflows: u64,
    /// How many traps happened while interrupts were postponed?
    postponed_traps: u64,
    /// How many times has a thread's guard state been archived?
    threads_archived: u64,
    /// How many times has a thread's guard state been restored?
    threads_restored: u64,
}

impl Stats {
    #[cfg(not(test))]
    pub fn new() -> Self {
        if let Ok(p) = env::var("SGD_LOG_STATS") {
            Self {
                inner: Some(Mutex::new(StatsInner::new(p))),
            }
        } else {
            Self { inner: None }
        }
    }

    #[cfg(test)]
    pub fn new() -> Self {
        Self {
            inner: Some(Mutex::new(StatsInner::new("-".to_string()))),
        }
    }

    /// If `SGD_LOG_STATS` was specified, update `inner` by running the function `f`, otherwise
    /// return immediately without calling `f`.
    fn update_with<F>(&self, f: F)
    where
        F: FnOnce(&mut StatsInner),
    {
        if let Some(mtx) = &self.inner {
            f(mtx.lock().deref_mut());
        }
    }

    /// Increment the "`flag` has been requested" count.
    pub fn interrupt_requested(&self, flag: InterruptFlag) {
        self.update_with(|inner| inner.requested[flag as usize] += 1);
    }

    /// Increment the "`flag` has been dispatched" count.
    pub fn interrupt_handled(&self, flag: InterruptFlag) {
        self.update_with(|inner| inner.handled[flag as usize] += 1);
    }

    /// Increment the "a trap was a genuine stack overflow" count.
    pub fn stack_overflow(&self) {
        self.update_with(|inner| inner.stack_overflows += 1);
    }

    /// Increment the "a trap happened while interrupts were postponed" count.
    pub fn postponed_trap(&self) {
        self.update_with(|inner| inner.postponed_traps += 1);
    }

    pub fn thread_archived(&self) {
        self.update_with(|inner| inner.threads_archived += 1);
    }

    pub fn thread_restored(&self) {
        self.update_with(|inner| inner.threads_restored += 1);
    }

    /// Output these statistics to the appropriate output path.
    pub(crate) fn output(&self) {
        self.update_with(|inner| inner.output());
    }

    #[cfg(test)]
    pub(crate) fn handled_count(&self, flag: InterruptFlag) -> u64 {
        self.inner.as_ref().unwrap().lock().handled[flag as usize]
    }
}

impl Drop for Stats {
    fn drop(&mut self) {
        self.output();
    }
}

impl StatsInner {
    fn new(output_path: String) -> Self {
        Self {
            output_path,
            requested: [0; InterruptFlag::COUNT],
            handled: [0; InterruptFlag::COUNT],
            stack_overflows: 0,
            postponed_traps: 0,
            threads_archived: 0,
            threads_restored: 0,
        }
    }

    /// Output these statistics to the appropriate output path.
    fn output(&self) {
        let json = self.to_json();
        if self.output_path == "-" {
            eprintln!("{json}");
        } else {
            fs::write(&self.output_path, json).ok();
        }
    }

    /// Turn these statistics into JSON. The output is guaranteed to be sorted by field name so
    /// that textual matching of the JSON string is possible.
    fn to_json(&self) -> String {
        let mut fields = vec![
            (
                "stack_overflows".to_owned(),
                self.stack_overflows.to_string(),
            ),
            (
                "postponed_traps".to_owned(),
                self.postponed_traps.to_string(),
            ),
            (
                "threads_archived".to_owned(),
                self.threads_archived.to_string(),
            ),
            (
                "threads_restored".to_owned(),
                self.threads_restored.to_string(),
            ),
        ];
        for f in InterruptFlag::iter() {
            fields.push((
                format!("requested_{f}"),
                self.requested[f as usize].to_string(),
            ));
            fields.push((
                format!("handled_{f}"),
                self.handled[f as usize].to_string(),
            ));
        }
        // We sort the output fields so that tests can match the output with a simple text match.
        fields.sort_unstable_by(|(k1, _), (k2, _)| k1.cmp(k2));
        format!(
            r#"{{
    {}
}}"#,
            fields
                .iter()
                .map(|(x, y)| format!(r#""{x}": {y}"#))
                .collect::<Vec<_>>()
                .join(",\n    ")
        )
    }
}
