//! Minimal leveled logging to stderr.
//!
//! A global atomic level filters messages; lines carry the time elapsed since
//! the first log call. The machine's instruction trace rides the debug level,
//! so `init(Level::Debug)` turns it on without touching stdout output.

use std::fmt::Display;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

/// Log level for filtering messages.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Debug => write!(f, "DEBUG"),
            Level::Info => write!(f, "INFO"),
            Level::Warn => write!(f, "WARN"),
            Level::Error => write!(f, "ERROR"),
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static START: OnceLock<Instant> = OnceLock::new();

/// Initializes the logger with the given minimum level.
pub fn init(level: Level) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// True if messages of the given level pass the filter.
#[inline]
fn enabled(level: Level) -> bool {
    level as u8 >= LOG_LEVEL.load(Ordering::Relaxed)
}

/// Logs a message with no component prefix.
pub fn log(level: Level, message: &str) {
    log_with_id(level, None, message);
}

fn log_with_id(level: Level, id: Option<&str>, message: &str) {
    if !enabled(level) {
        return;
    }
    let elapsed = START.get_or_init(Instant::now).elapsed().as_secs_f64();
    match id {
        Some(id) => eprintln!("[{elapsed:>9.3}s] [{level:<5}] [{id}] {message}"),
        None => eprintln!("[{elapsed:>9.3}s] [{level:<5}] {message}"),
    }
}

/// Logger with a component identifier prefixed to every message.
#[derive(Clone)]
pub struct Logger {
    id: Arc<str>,
}

impl Logger {
    /// Creates a logger with the given identifier.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self { id: id.into() }
    }

    /// Logs a debug-level message.
    pub fn debug(&self, message: &str) {
        log_with_id(Level::Debug, Some(&self.id), message);
    }

    /// Logs an info-level message.
    pub fn info(&self, message: &str) {
        log_with_id(Level::Info, Some(&self.id), message);
    }

    /// Logs a warning-level message.
    pub fn warn(&self, message: &str) {
        log_with_id(Level::Warn, Some(&self.id), message);
    }

    /// Logs an error-level message.
    pub fn error(&self, message: &str) {
        log_with_id(Level::Error, Some(&self.id), message);
    }
}

/// Logs a formatted debug-level message.
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::utils::log::log($crate::utils::log::Level::Debug, &format!($($arg)*))
    };
}

/// Logs a formatted info-level message.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::utils::log::log($crate::utils::log::Level::Info, &format!($($arg)*))
    };
}

/// Logs a formatted warning-level message.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::utils::log::log($crate::utils::log::Level::Warn, &format!($($arg)*))
    };
}

/// Logs a formatted error-level message.
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::utils::log::log($crate::utils::log::Level::Error, &format!($($arg)*))
    };
}
