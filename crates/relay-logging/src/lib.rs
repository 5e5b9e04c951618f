// SPDX-License-Identifier: Apache-2.0

//! Process-global structured logging sink (spec §6, "Logging sink").
//!
//! Four levels, printf-style format strings, local wall-clock timestamps
//! rendered `YYYY-MM-DD HH:MM:SS`, no file rotation. Every call site goes
//! through the [`Logger`] trait via a process-global instance installed
//! once at startup with [`set_logger`]; the default is [`StderrLogger`].
//!
//! Grounded on the teacher's leveled, structured event macros
//! (`otel_info!`/`otel_warn!` in `crates/controller/src/lib.rs`) reshaped to
//! the plain four-level printf-style sink spec §6 calls for, rather than
//! the teacher's richer NUMA-aware telemetry SDK.

use chrono::Local;
use once_cell::sync::OnceCell;
use std::fmt;

/// Severity of a single logged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Diagnostic detail useful only while developing or troubleshooting.
    Debug,
    /// Normal operational events.
    Info,
    /// Recoverable problems: dropped messages, unknown ids, retried I/O.
    Warning,
    /// Failures that end a session, a pool operation, or the process.
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
        };
        f.write_str(s)
    }
}

/// A structured-event sink. `target` is a module-path-like string
/// identifying the emitting component (e.g. `"relay_session::writer"`).
pub trait Logger: Send + Sync {
    /// Emits one already-formatted event at `level`.
    fn log(&self, level: Level, target: &str, message: &str);
}

/// Default sink: one line per event to stderr, `{timestamp} [{level}]
/// {target}: {message}`, timestamp local wall-clock `YYYY-MM-DD HH:MM:SS`.
#[derive(Debug, Default)]
pub struct StderrLogger {
    min_level: Level,
}

impl StderrLogger {
    /// Creates a sink that emits everything at `min_level` or louder.
    #[must_use]
    pub fn new(min_level: Level) -> Self {
        Self { min_level }
    }
}

impl Default for Level {
    fn default() -> Self {
        Level::Info
    }
}

impl Logger for StderrLogger {
    // This is the one designated sink for process output; every other
    // crate in the workspace goes through `Logger::log`, not `eprintln!`
    // directly, which is what the workspace-wide `print_stderr` lint
    // otherwise guards against.
    #[allow(clippy::print_stderr)]
    fn log(&self, level: Level, target: &str, message: &str) {
        if level < self.min_level {
            return;
        }
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        eprintln!("{timestamp} [{level}] {target}: {message}");
    }
}

static LOGGER: OnceCell<Box<dyn Logger>> = OnceCell::new();

/// Installs the process-global logger. May be called at most once, before
/// any `log_*!` call site runs; later calls are ignored (the first
/// installation wins), matching the `log` crate's `set_logger` contract.
pub fn set_logger(logger: Box<dyn Logger>) {
    let _ = LOGGER.set(logger);
}

/// Returns the installed logger, installing the default [`StderrLogger`]
/// on first use if nothing was set.
pub fn logger() -> &'static dyn Logger {
    LOGGER
        .get_or_init(|| Box::new(StderrLogger::default()))
        .as_ref()
}

/// Emits one event at `level` to the process-global sink. Prefer the
/// `log_info!`/`log_warn!`/`log_error!`/`log_debug!` macros at call sites.
pub fn log(level: Level, target: &str, message: fmt::Arguments<'_>) {
    logger().log(level, target, &message.to_string());
}

/// Logs at [`Level::Info`].
#[macro_export]
macro_rules! log_info {
    ($target:expr, $($arg:tt)+) => {
        $crate::log($crate::Level::Info, $target, format_args!($($arg)+))
    };
}

/// Logs at [`Level::Warning`].
#[macro_export]
macro_rules! log_warn {
    ($target:expr, $($arg:tt)+) => {
        $crate::log($crate::Level::Warning, $target, format_args!($($arg)+))
    };
}

/// Logs at [`Level::Error`].
#[macro_export]
macro_rules! log_error {
    ($target:expr, $($arg:tt)+) => {
        $crate::log($crate::Level::Error, $target, format_args!($($arg)+))
    };
}

/// Logs at [`Level::Debug`].
#[macro_export]
macro_rules! log_debug {
    ($target:expr, $($arg:tt)+) => {
        $crate::log($crate::Level::Debug, $target, format_args!($($arg)+))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingLogger {
        events: Mutex<Vec<(Level, String, String)>>,
    }

    impl Logger for CapturingLogger {
        fn log(&self, level: Level, target: &str, message: &str) {
            self.events
                .lock()
                .unwrap()
                .push((level, target.to_string(), message.to_string()));
        }
    }

    #[test]
    fn macro_formats_printf_style_arguments() {
        let logger = CapturingLogger::default();
        logger.log(Level::Info, "test", &format!("id={} name={}", 7, "abc"));
        let events = logger.events.lock().unwrap();
        assert_eq!(events[0].2, "id=7 name=abc");
    }

    #[test]
    fn stderr_logger_filters_below_min_level() {
        // Can't easily capture stderr here; just check the filtering logic
        // doesn't panic and respects ordering.
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warning);
        assert!(Level::Warning < Level::Error);
    }

    #[test]
    fn level_display_matches_lowercase_names() {
        assert_eq!(Level::Info.to_string(), "info");
        assert_eq!(Level::Warning.to_string(), "warning");
        assert_eq!(Level::Error.to_string(), "error");
        assert_eq!(Level::Debug.to_string(), "debug");
    }
}
