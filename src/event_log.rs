//! The logging capability handed to every component.
//!
//! Nothing in the library logs through a global; components hold an
//! `Arc<dyn EventLog>` given to them at construction time. The binary wires in
//! [`LogFacade`], which forwards to the `log` crate; tests use [`MemoryLog`].

use std::sync::Mutex;

pub use log::Level;

pub trait EventLog: Send + Sync {
    /// Record one structured line for `component`.
    fn record(&self, level: Level, component: &'static str, message: &str);

    fn info(&self, component: &'static str, message: &str) {
        self.record(Level::Info, component, message)
    }

    fn warn(&self, component: &'static str, message: &str) {
        self.record(Level::Warn, component, message)
    }

    fn error(&self, component: &'static str, message: &str) {
        self.record(Level::Error, component, message)
    }
}

/// Forwards to whatever `log` backend the process installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFacade;

impl EventLog for LogFacade {
    fn record(&self, level: Level, component: &'static str, message: &str) {
        log!(target: component, level, "({}) {}", component, message);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub level: Level,
    pub component: &'static str,
    pub message: String,
}

/// Keeps every entry in memory.
#[derive(Debug, Default)]
pub struct MemoryLog(Mutex<Vec<LogEntry>>);

impl MemoryLog {
    pub fn new() -> MemoryLog {
        MemoryLog(Mutex::new(Vec::new()))
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        match self.0.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// True if any entry at `level` contains `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.entries()
            .iter()
            .any(|e| e.level == level && e.message.contains(needle))
    }
}

impl EventLog for MemoryLog {
    fn record(&self, level: Level, component: &'static str, message: &str) {
        let entry = LogEntry {
            level,
            component,
            message: message.to_owned(),
        };
        match self.0.lock() {
            Ok(mut guard) => guard.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}
