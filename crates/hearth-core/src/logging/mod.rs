//! Category-tagged, multi-sink logging.
//!
//! A [`Logger`] owns an ordered list of [`Sink`]s. Call sites build a scoped
//! [`LogMessage`] (usually through the `log_*!` macros), write formatted text
//! into it, and the message hands its text and [`Tags`] to the logger when it
//! is dropped. The logger forwards every flushed message to all sinks in
//! registration order.
//!
//! Each [`Category`] can be switched on and off process-wide through lock-free
//! atomic flags.

mod sink;
mod subscriber;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::{bail, Result};

pub use sink::{ConsoleSink, FileSink, LogEntry, RingSink, TracingSink};
pub use subscriber::{init, log_dir};

/// Log category. Every category has an independent enable flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Debug,
    Message,
    Warning,
    Error,
    Fatal,
}

static ENABLED: [AtomicBool; 5] = [
    AtomicBool::new(true),
    AtomicBool::new(true),
    AtomicBool::new(true),
    AtomicBool::new(true),
    AtomicBool::new(true),
];

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Debug,
        Category::Message,
        Category::Warning,
        Category::Error,
        Category::Fatal,
    ];

    fn flag(self) -> &'static AtomicBool {
        &ENABLED[self as usize]
    }

    /// Whether messages of this category reach the sinks.
    pub fn is_enabled(self) -> bool {
        self.flag().load(Ordering::Relaxed)
    }

    /// Enable or disable this category for the whole process.
    pub fn set_enabled(self, enabled: bool) {
        self.flag().store(enabled, Ordering::Relaxed);
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Debug => "DEBUG",
            Category::Message => "MESSAGE",
            Category::Warning => "WARNING",
            Category::Error => "ERROR",
            Category::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Category::Debug),
            "message" | "info" => Ok(Category::Message),
            "warning" | "warn" => Ok(Category::Warning),
            "error" => Ok(Category::Error),
            "fatal" => Ok(Category::Fatal),
            other => bail!("unknown log category: {other:?}"),
        }
    }
}

/// Enable every category, then disable the named ones.
pub fn apply_disabled_categories(names: &[String]) -> Result<()> {
    let disabled = names
        .iter()
        .map(|name| name.parse::<Category>())
        .collect::<Result<Vec<_>>>()?;
    for category in Category::ALL {
        category.set_enabled(!disabled.contains(&category));
    }
    Ok(())
}

/// Tags attached to every flushed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tags {
    pub category: Category,
    pub file: &'static str,
    pub line: u32,
}

/// A log destination.
///
/// `write` must not fail; sinks that can fail (files, sockets) report errors
/// when they are constructed.
pub trait Sink: Send + Sync {
    fn write(&self, tags: &Tags, text: &str);
}

/// Distributes flushed messages to its sinks.
#[derive(Default)]
pub struct Logger {
    sinks: Mutex<Vec<Arc<dyn Sink>>>,
}

impl Logger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink. Adding the same `Arc` twice is ignored with a
    /// warning and returns `false`.
    pub fn add(&self, sink: Arc<dyn Sink>) -> bool {
        let added = {
            let mut sinks = self.lock();
            if sinks.iter().any(|s| std::ptr::addr_eq(Arc::as_ptr(s), Arc::as_ptr(&sink))) {
                false
            } else {
                sinks.push(sink);
                true
            }
        };
        if !added {
            crate::log_warning!(logger: self, "log sink already registered; ignoring");
        }
        added
    }

    /// Unregister a sink by identity. Returns `false` if it was not present.
    pub fn remove<S: Sink + ?Sized>(&self, sink: &Arc<S>) -> bool {
        let mut sinks = self.lock();
        let before = sinks.len();
        sinks.retain(|s| !std::ptr::addr_eq(Arc::as_ptr(s), Arc::as_ptr(sink)));
        sinks.len() != before
    }

    pub fn remove_all(&self) {
        self.lock().clear();
    }

    pub fn sink_count(&self) -> usize {
        self.lock().len()
    }

    /// Start a message. Text written into it is flushed when it drops.
    pub fn message(&self, category: Category, file: &'static str, line: u32) -> LogMessage<'_> {
        LogMessage {
            logger: self,
            tags: Tags {
                category,
                file,
                line,
            },
            text: String::new(),
        }
    }

    /// Hand a finished message to every sink, in registration order.
    ///
    /// Disabled categories are dropped here. The sink list is snapshotted so
    /// sinks run without the lock held.
    pub fn flush(&self, tags: &Tags, text: &str) {
        if !tags.category.is_enabled() {
            return;
        }
        let sinks: Vec<Arc<dyn Sink>> = self.lock().clone();
        for sink in sinks {
            sink.write(tags, text);
        }
    }

    // Every mutation is a single push, retain or clear, so a poisoned list is
    // still consistent.
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn Sink>>> {
        self.sinks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Process-wide logger used by the `log_*!` macros when no explicit logger is
/// given.
pub fn global() -> &'static Arc<Logger> {
    static GLOBAL: OnceLock<Arc<Logger>> = OnceLock::new();
    GLOBAL.get_or_init(|| Arc::new(Logger::new()))
}

/// A scoped accumulation buffer. Flushes to its logger on drop.
pub struct LogMessage<'a> {
    logger: &'a Logger,
    tags: Tags,
    text: String,
}

impl LogMessage<'_> {
    /// Append a displayable value.
    pub fn push(&mut self, value: impl fmt::Display) -> &mut Self {
        let _ = fmt::Write::write_fmt(self, format_args!("{value}"));
        self
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }
}

impl fmt::Write for LogMessage<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.text.push_str(s);
        Ok(())
    }
}

impl Drop for LogMessage<'_> {
    fn drop(&mut self) {
        let text = std::mem::take(&mut self.text);
        self.logger.flush(&self.tags, &text);
    }
}

/// Log a formatted message at the given category.
///
/// `log_at!(logger: &my_logger, Category::Warning, "...")` targets an explicit
/// logger; without the `logger:` prefix the [`global`] logger is used.
#[macro_export]
macro_rules! log_at {
    (logger: $logger:expr, $category:expr, $($arg:tt)+) => {{
        let __category: $crate::logging::Category = $category;
        if __category.is_enabled() {
            let mut __message =
                $crate::logging::Logger::message(&*$logger, __category, file!(), line!());
            let _ = ::std::fmt::Write::write_fmt(&mut __message, format_args!($($arg)+));
        }
    }};
    ($category:expr, $($arg:tt)+) => {
        $crate::log_at!(logger: $crate::logging::global(), $category, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_debug {
    (logger: $logger:expr, $($arg:tt)+) => {
        $crate::log_at!(logger: $logger, $crate::logging::Category::Debug, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::log_at!($crate::logging::Category::Debug, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_message {
    (logger: $logger:expr, $($arg:tt)+) => {
        $crate::log_at!(logger: $logger, $crate::logging::Category::Message, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::log_at!($crate::logging::Category::Message, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_warning {
    (logger: $logger:expr, $($arg:tt)+) => {
        $crate::log_at!(logger: $logger, $crate::logging::Category::Warning, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::log_at!($crate::logging::Category::Warning, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_error {
    (logger: $logger:expr, $($arg:tt)+) => {
        $crate::log_at!(logger: $logger, $crate::logging::Category::Error, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::log_at!($crate::logging::Category::Error, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_fatal {
    (logger: $logger:expr, $($arg:tt)+) => {
        $crate::log_at!(logger: $logger, $crate::logging::Category::Fatal, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::log_at!($crate::logging::Category::Fatal, $($arg)+)
    };
}

/// Serializes tests that flip the process-wide category flags or assert on
/// what reaches a sink.
#[cfg(test)]
pub(crate) fn category_guard() -> std::sync::MutexGuard<'static, ()> {
    static CATEGORY_LOCK: Mutex<()> = Mutex::new(());
    CATEGORY_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}
