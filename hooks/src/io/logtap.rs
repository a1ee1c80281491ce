//! Build log sinks.
//!
//! The build log is product output, separate from the `tracing` diagnostics
//! set up in [`crate::logging`]. Fragments arrive already formatted and are
//! written as-is.

use std::io::Write;
use std::sync::Mutex;

use tracing::warn;

use crate::core::types::LogLevel;

/// Receives formatted fragments keyed by severity.
pub trait LogSink {
    fn print(&self, fragment: &str, level: LogLevel);
}

/// Writes fragments at or above a threshold to stderr.
#[derive(Debug)]
pub struct StderrSink {
    threshold: LogLevel,
}

impl StderrSink {
    pub fn new(threshold: LogLevel) -> Self {
        Self { threshold }
    }

    /// Threshold from the framework payload's `log_level`, `info` when unset
    /// or unrecognised.
    pub fn from_payload_level(level: Option<&str>) -> Self {
        let threshold = match level.map(str::parse::<LogLevel>) {
            Some(Ok(level)) => level,
            Some(Err(err)) => {
                warn!(%err, "falling back to info build log level");
                LogLevel::Info
            }
            None => LogLevel::Info,
        };
        Self::new(threshold)
    }

    pub fn threshold(&self) -> LogLevel {
        self.threshold
    }
}

impl LogSink for StderrSink {
    fn print(&self, fragment: &str, level: LogLevel) {
        if level < self.threshold {
            return;
        }
        let mut stderr = std::io::stderr().lock();
        if let Err(err) = stderr
            .write_all(fragment.as_bytes())
            .and_then(|()| stderr.flush())
        {
            warn!(%err, "failed to write build log");
        }
    }
}

/// Keeps every fragment in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<(LogLevel, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Concatenated text of every fragment.
    pub fn text(&self) -> String {
        self.entries()
            .into_iter()
            .map(|(_, fragment)| fragment)
            .collect()
    }
}

impl LogSink for MemorySink {
    fn print(&self, fragment: &str, level: LogLevel) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((level, fragment.to_string()));
        }
    }
}

impl<S: LogSink + ?Sized> LogSink for &S {
    fn print(&self, fragment: &str, level: LogLevel) {
        (**self).print(fragment, level);
    }
}
