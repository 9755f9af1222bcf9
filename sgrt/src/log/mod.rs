//! The implementation of the `SGD_LOG` environment variable.
//!
//! `SGD_LOG` takes the form `[<path|->:]<level>`. Without a path (or with a path of `-`) log
//! messages go to stderr. If unset, only errors are logged.

use std::{env, error::Error, fs::File, io::Write, path::PathBuf};
use strum::{EnumCount, FromRepr};

pub(crate) mod stats;

/// How verbose should the stack guard's logging be?
#[repr(u8)]
#[derive(Copy, Clone, Debug, EnumCount, FromRepr, PartialEq, PartialOrd)]
pub(crate) enum Verbosity {
    /// Disable logging entirely.
    Disabled,
    /// Log errors.
    Error,
    /// Log warnings (e.g. a genuine stack overflow).
    Warning,
    /// Log interrupt requests and their dispatch.
    InterruptEvent,
    /// Log a thread entering, leaving, or being handed a context.
    ThreadEvent,
}

pub(crate) struct Log {
    /// The requested [Verbosity] level for logging.
    level: Verbosity,
    /// The path to write to. A value of `None` should default to the platform specific standard
    /// for logging (e.g. stderr).
    path: Option<PathBuf>,
}

impl Log {
    pub(crate) fn new() -> Result<Self, Box<dyn Error>> {
        match env::var("SGD_LOG") {
            Ok(s) => Self::parse(&s),
            Err(_) => Ok(Self {
                path: None,
                level: Verbosity::Error,
            }),
        }
    }

    /// Parse a `[<path|->:]<level>` string.
    fn parse(s: &str) -> Result<Self, Box<dyn Error>> {
        let (path, level) = match s.split(':').collect::<Vec<_>>()[..] {
            [path, level] => {
                if path == "-" {
                    (None, level)
                } else {
                    let path = PathBuf::from(path);
                    // If there's an existing log file, truncate (i.e. empty it), so that later
                    // appends to the log aren't appending to a previous log run.
                    File::create(&path).ok();
                    (Some(path), level)
                }
            }
            [level] => (None, level),
            [..] => return Err("SGD_LOG must be of the format `[<path|->:]<level>`".into()),
        };
        let level = level
            .parse::<u8>()
            .map_err(|e| format!("Invalid SGD_LOG level '{s}': {e}"))?;
        // This unwrap can only fail dynamically if we've got the types wrong statically
        // (i.e. it'll fail as soon as this code is executed for the first time).
        let max_level = u8::try_from(Verbosity::COUNT).unwrap() - 1;
        let level = Verbosity::from_repr(level)
            .ok_or_else(|| format!("SGD_LOG level {level} exceeds maximum {max_level}"))?;
        Ok(Self { path, level })
    }

    /// Would a message at `level` be logged? Useful to avoid building expensive messages.
    pub(crate) fn enabled(&self, level: Verbosity) -> bool {
        level <= self.level
    }

    /// Log `msg` with the [Verbosity] level `verbosity`.
    ///
    /// # Panics
    ///
    /// If `level == Verbosity::Disabled`.
    pub(crate) fn log(&self, level: Verbosity, msg: &str) {
        if self.enabled(level) {
            let prefix = match level {
                Verbosity::Disabled => panic!(),
                Verbosity::Error => "sg-error",
                Verbosity::Warning => "sg-warning",
                Verbosity::InterruptEvent => "sg-interrupt",
                Verbosity::ThreadEvent => "sg-thread",
            };
            match &self.path {
                Some(p) => {
                    let s = format!("{prefix}: {msg}\n");
                    File::options()
                        .append(true)
                        .open(p)
                        .map(|mut x| x.write(s.as_bytes()))
                        .ok();
                }
                None => {
                    eprintln!("{prefix}: {msg}");
                }
            }
        }
    }
}
