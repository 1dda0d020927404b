//! Process-wide diagnostic logging. This is entirely separate from the
//! supervisor's own protocol output (`Process <pid> created (...)`, the
//! per-line relay, `Process <pid> exited (...)`), which is written directly
//! with `println!`/`eprintln!` and never passes through `slog` — that
//! output is this program's primary product, not a diagnostic.

use anyhow::{anyhow, Result};
use slog::Drain;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn parse(s: &str) -> Result<LogLevel> {
        match s {
            "error" => Ok(LogLevel::Error),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(anyhow!("unknown log level {other:?}")),
        }
    }

    fn as_slog_level(self) -> slog::Level {
        match self {
            LogLevel::Error => slog::Level::Error,
            LogLevel::Warning => slog::Level::Warning,
            LogLevel::Info => slog::Level::Info,
            LogLevel::Debug => slog::Level::Debug,
            LogLevel::Trace => slog::Level::Trace,
        }
    }
}

/// Builds the process-wide logger: plain-text formatting over stderr,
/// asynchronous so a slow terminal can't stall the event loop, filtered at
/// `level`.
pub fn build(level: LogLevel) -> slog::Logger {
    let decorator = slog_term::PlainDecorator::new(std::io::stderr());
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = slog::LevelFilter::new(drain, level.as_slog_level()).fuse();
    slog::Logger::root(drain, slog::o!())
}
