//! Leveled file logging.
//!
//! The log goes to `~/.loopsmith/loopsmith.log` and is truncated on startup.
//! The level comes from `LOOPSMITH_LOG` (`error`, `warn`, `info`, `debug`,
//! `trace`). Without it, `--debug` or `LOOPSMITH_DEBUG=1` selects debug and
//! anything else selects info.
//!
//! Every `llog*` macro checks the level before formatting, so trace lines for
//! each stream event cost nothing unless enabled.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};

static SINK: OnceLock<Mutex<File>> = OnceLock::new();
static MAX_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl Level {
    fn label(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(Level::Error),
            "warn" | "warning" => Ok(Level::Warn),
            "info" => Ok(Level::Info),
            "debug" => Ok(Level::Debug),
            "trace" => Ok(Level::Trace),
            other => Err(format!("unknown log level {:?}", other)),
        }
    }
}

/// Where and how much to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: Level,
    /// `None` disables the file sink.
    pub path: Option<PathBuf>,
}

impl LogSettings {
    /// Settings from the environment and the `--debug` flag.
    pub fn from_env(debug_flag: bool) -> Self {
        let level = resolve_level(
            std::env::var("LOOPSMITH_LOG").ok().as_deref(),
            std::env::var("LOOPSMITH_DEBUG").ok().as_deref(),
            debug_flag,
        );
        Self {
            level,
            path: dirs::home_dir().map(|h| h.join(".loopsmith").join("loopsmith.log")),
        }
    }
}

fn resolve_level(log_var: Option<&str>, debug_var: Option<&str>, debug_flag: bool) -> Level {
    if let Some(level) = log_var.and_then(|v| v.parse().ok()) {
        return level;
    }
    let env_debug = debug_var.is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    if debug_flag || env_debug {
        Level::Debug
    } else {
        Level::Info
    }
}

/// Install the sink. Only the first call opens a file.
pub fn init(settings: LogSettings) {
    MAX_LEVEL.store(settings.level as u8, Ordering::SeqCst);
    let Some(path) = settings.path else {
        return;
    };
    if let Some(dir) = path.parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    if let Ok(file) = File::create(&path) {
        let _ = SINK.set(Mutex::new(file));
    }
}

pub fn enabled(level: Level) -> bool {
    level as u8 <= MAX_LEVEL.load(Ordering::Relaxed)
}

/// Append one line. Dropped when no sink is installed.
pub fn write(level: Level, msg: &str) {
    let Some(sink) = SINK.get() else {
        return;
    };
    if let Ok(mut file) = sink.lock() {
        let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
        let _ = writeln!(file, "[{}] [{}] {}", timestamp, level.label(), msg);
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __llog_at {
    ($level:expr, $($arg:tt)*) => {
        if $crate::log::enabled($level) {
            $crate::log::write($level, &format!($($arg)*))
        }
    };
}

/// Info-level log line.
#[macro_export]
macro_rules! llog {
    ($($arg:tt)*) => { $crate::__llog_at!($crate::log::Level::Info, $($arg)*) };
}

#[macro_export]
macro_rules! llog_error {
    ($($arg:tt)*) => { $crate::__llog_at!($crate::log::Level::Error, $($arg)*) };
}

#[macro_export]
macro_rules! llog_warn {
    ($($arg:tt)*) => { $crate::__llog_at!($crate::log::Level::Warn, $($arg)*) };
}

#[macro_export]
macro_rules! llog_debug {
    ($($arg:tt)*) => { $crate::__llog_at!($crate::log::Level::Debug, $($arg)*) };
}

/// Per stream event; very verbose.
#[macro_export]
macro_rules! llog_trace {
    ($($arg:tt)*) => { $crate::__llog_at!($crate::log::Level::Trace, $($arg)*) };
}
