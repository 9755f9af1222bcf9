//! The per-thread guard record and its archive format.
//!
//! An archive is [ARCHIVE_SPACE_PER_THREAD] bytes: one native-endian `u64` per field of
//! [ThreadLocal], in the order [ThreadLocal::archive] writes them. Function and data pointers are stored as addresses, so an
//! archive is only meaningful inside the process that wrote it.

use super::{CallbackData, InterruptCallback, InterruptFlags, ILLEGAL_LIMIT, INTERRUPT_LIMIT};
use crate::errors::GuardError;
use byteorder::{ByteOrder, NativeEndian};
use static_assertions::const_assert;
use std::{mem, ptr};

/// How many `u64` words does an archived [ThreadLocal] occupy?
const ARCHIVE_WORDS: usize = 10;

/// How many bytes does [crate::StackGuard::archive] need to archive one thread?
pub const ARCHIVE_SPACE_PER_THREAD: usize = ARCHIVE_WORDS * mem::size_of::<u64>();

// Every `usize` field is archived as a `u64`.
const_assert!(mem::size_of::<usize>() <= mem::size_of::<u64>());

/// A plain copy of one thread's guard state.
///
/// The stack limit is split into a language-level ("JS") and a native ("C") limit. Each has a
/// `real_` value, the limit actually set for the thread, and an effective value which equals the
/// real one except when an interrupt is armed, in which case it is [INTERRUPT_LIMIT]. Stack checks
/// compare against the effective values.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ThreadLocal {
    pub(crate) real_jslimit: usize,
    pub(crate) jslimit: usize,
    pub(crate) real_climit: usize,
    pub(crate) climit: usize,
    pub(crate) nesting: usize,
    /// Which thread record is this? 0 for a cleared record.
    pub(crate) record: u64,
    pub(crate) postpone_interrupts_nesting: usize,
    pub(crate) interrupt_flags: InterruptFlags,
    pub(crate) interrupt_callback: Option<InterruptCallback>,
    pub(crate) interrupt_callback_data: CallbackData,
}

impl ThreadLocal {
    /// A record that doesn't look as if any thread has been set up.
    pub(crate) fn cleared() -> Self {
        Self {
            real_jslimit: ILLEGAL_LIMIT,
            jslimit: ILLEGAL_LIMIT,
            real_climit: ILLEGAL_LIMIT,
            climit: ILLEGAL_LIMIT,
            nesting: 0,
            record: 0,
            postpone_interrupts_nesting: 0,
            interrupt_flags: InterruptFlags::empty(),
            interrupt_callback: None,
            interrupt_callback_data: CallbackData(ptr::null_mut()),
        }
    }

    /// Is no thread's state held in this record?
    pub(crate) fn is_vacant(&self) -> bool {
        self.real_climit == ILLEGAL_LIMIT
    }

    /// Recompute the effective limits from the real limits and the pending interrupts.
    pub(crate) fn rearm(&mut self) {
        if !self.interrupt_flags.is_empty() && self.postpone_interrupts_nesting == 0 {
            self.jslimit = INTERRUPT_LIMIT;
            self.climit = INTERRUPT_LIMIT;
        } else {
            self.jslimit = self.real_jslimit;
            self.climit = self.real_climit;
        }
    }

    /// Keep interrupts that were requested while no thread's state was installed: they were
    /// addressed to the context, not to a particular thread.
    pub(crate) fn adopt_requests(&mut self, vacant: &ThreadLocal) {
        debug_assert!(vacant.is_vacant());
        self.interrupt_flags = self.interrupt_flags.union(vacant.interrupt_flags);
        if let Some(cb) = vacant.interrupt_callback {
            self.interrupt_callback = Some(cb);
            self.interrupt_callback_data = vacant.interrupt_callback_data;
        }
    }

    /// Write this record into `to`, returning the number of bytes written.
    pub(crate) fn archive(&self, to: &mut [u8]) -> Result<usize, GuardError> {
        if to.len() < ARCHIVE_SPACE_PER_THREAD {
            return Err(GuardError::ArchiveTooSmall {
                needed: ARCHIVE_SPACE_PER_THREAD,
                got: to.len(),
            });
        }
        let words: [u64; ARCHIVE_WORDS] = [
            self.real_jslimit as u64,
            self.jslimit as u64,
            self.real_climit as u64,
            self.climit as u64,
            self.nesting as u64,
            self.postpone_interrupts_nesting as u64,
            u64::from(self.interrupt_flags.bits()),
            self.interrupt_callback.map(|cb| cb as usize).unwrap_or(0) as u64,
            self.interrupt_callback_data.0 as usize as u64,
            self.record,
        ];
        NativeEndian::write_u64_into(&words, &mut to[..ARCHIVE_SPACE_PER_THREAD]);
        Ok(ARCHIVE_SPACE_PER_THREAD)
    }

    /// Read a record from `from`, returning it and the number of bytes read.
    ///
    /// # Safety
    ///
    /// `from` must have been written by [ThreadLocal::archive] in this process: the interrupt
    /// callback is rebuilt from the address stored in it.
    pub(crate) unsafe fn restore(from: &[u8]) -> Result<(Self, usize), GuardError> {
        if from.len() < ARCHIVE_SPACE_PER_THREAD {
            return Err(GuardError::ArchiveTooSmall {
                needed: ARCHIVE_SPACE_PER_THREAD,
                got: from.len(),
            });
        }
        let mut words = [0u64; ARCHIVE_WORDS];
        NativeEndian::read_u64_into(&from[..ARCHIVE_SPACE_PER_THREAD], &mut words);
        let word = |i: usize| {
            usize::try_from(words[i])
                .map_err(|_| GuardError::ArchiveInvalid(format!("word {i} doesn't fit a usize")))
        };
        let interrupt_flags = u32::try_from(words[6])
            .ok()
            .and_then(InterruptFlags::from_bits)
            .ok_or_else(|| {
                GuardError::ArchiveInvalid(format!("unknown interrupt flags {:#x}", words[6]))
            })?;
        let interrupt_callback = match word(7)? {
            0 => None,
            x => Some(unsafe { mem::transmute::<usize, InterruptCallback>(x) }),
        };
        let tl = Self {
            real_jslimit: word(0)?,
            jslimit: word(1)?,
            real_climit: word(2)?,
            climit: word(3)?,
            nesting: word(4)?,
            postpone_interrupts_nesting: word(5)?,
            interrupt_flags,
            interrupt_callback,
            interrupt_callback_data: CallbackData(word(8)? as *mut _),
            record: words[9],
        };
        for (real, effective) in [(tl.real_jslimit, tl.jslimit), (tl.real_climit, tl.climit)] {
            if effective != real && effective != INTERRUPT_LIMIT {
                return Err(GuardError::ArchiveInvalid(format!(
                    "effective limit {effective:#x} is neither the real limit {real:#x} nor the interrupt limit"
                )));
            }
        }
        Ok((tl, ARCHIVE_SPACE_PER_THREAD))
    }
}
