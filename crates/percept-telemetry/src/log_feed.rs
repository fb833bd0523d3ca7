use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Dashboard log console keeps this many entries.
pub const LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    System,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::System => "SYSTEM",
        };
        f.write_str(s)
    }
}

/// Originating subsystem of a log entry, shown as a column in the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    Audio,
    Video,
    Brain,
    Core,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Subsystem::Audio => "AUDIO",
            Subsystem::Video => "VIDEO",
            Subsystem::Brain => "BRAIN",
            Subsystem::Core => "CORE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub subsystem: Subsystem,
    pub message: String,
}

impl LogEntry {
    pub fn time_str(&self) -> String {
        self.timestamp.format("%H:%M:%S").to_string()
    }
}

/// Bounded, arrival-ordered log ring backing the dashboard console.
///
/// Every push also emits a `tracing` event at the matching level so the
/// rotating log file carries the same history as the UI.
#[derive(Clone)]
pub struct EventLog {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(LOG_CAPACITY))),
        }
    }

    pub fn push(&self, level: LogLevel, subsystem: Subsystem, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Warn => tracing::warn!(subsystem = %subsystem, "{}", message),
            LogLevel::Error => tracing::error!(subsystem = %subsystem, "{}", message),
            LogLevel::Info | LogLevel::System => {
                tracing::info!(subsystem = %subsystem, "{}", message)
            }
        }

        let mut entries = self.entries.lock();
        entries.push_back(LogEntry {
            timestamp: Local::now(),
            level,
            subsystem,
            message,
        });
        while entries.len() > LOG_CAPACITY {
            entries.pop_front();
        }
    }

    pub fn info(&self, subsystem: Subsystem, message: impl Into<String>) {
        self.push(LogLevel::Info, subsystem, message);
    }

    pub fn warn(&self, subsystem: Subsystem, message: impl Into<String>) {
        self.push(LogLevel::Warn, subsystem, message);
    }

    pub fn error(&self, subsystem: Subsystem, message: impl Into<String>) {
        self.push(LogLevel::Error, subsystem, message);
    }

    pub fn system(&self, subsystem: Subsystem, message: impl Into<String>) {
        self.push(LogLevel::System, subsystem, message);
    }

    /// Entries oldest-first; the console renders newest at the bottom.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of entries whose message contains `needle`. Test helper for
    /// asserting that an event was logged exactly once.
    pub fn count_containing(&self, needle: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.message.contains(needle))
            .count()
    }
}
