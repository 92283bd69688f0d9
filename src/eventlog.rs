//! Append-only structured event log, the operator-facing record of every
//! status transition. One line per event:
//!
//! ```text
//! [YYYY-MM-DD HH:MM:SS] [EVENT-ID] [CATEGORY] message
//! ```
//!
//! Every event is also mirrored to the `log` facade at debug level so the
//! console (`-v`) shows the same stream without tailing the file.

use std::fs::OpenOptions;
use std::io::{LineWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

/// Event categories, fixed by the operator tooling that consumes the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    FileParsing,
    MessageQueue,
    EmergencyStatus,
    RescuerStatus,
    Configuration,
    System,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::FileParsing => "FILE_PARSING",
            Category::MessageQueue => "MESSAGE_QUEUE",
            Category::EmergencyStatus => "EMERGENCY_STATUS",
            Category::RescuerStatus => "RESCUER_STATUS",
            Category::Configuration => "CONFIGURATION",
            Category::System => "SYSTEM",
        }
    }
}

/// Sink for structured events. Cheap to share behind an `Arc`; the writer is
/// guarded by its own mutex so emitting never touches the dispatcher lock.
pub struct EventLog {
    sink: Mutex<Option<Box<dyn Write + Send>>>,
}

impl EventLog {
    /// Open (or create) the log file in append mode.
    pub fn to_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(EventLog {
            sink: Mutex::new(Some(Box::new(LineWriter::new(file)))),
        })
    }

    /// A sink that drops every line. Events still reach the `log` facade;
    /// used by tests and by tools that only want the console stream.
    pub fn discard() -> Self {
        EventLog {
            sink: Mutex::new(None),
        }
    }

    /// Emit one event line.
    pub fn event(&self, category: Category, id: &str, message: impl AsRef<str>) {
        let message = message.as_ref();
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format_line(&timestamp.to_string(), id, category, message);
        log::debug!(target: "rescuegrid::events", "{}", line);
        let mut guard = self.sink.lock().expect("event log mutex poisoned");
        if let Some(sink) = guard.as_mut() {
            if let Err(err) = writeln!(sink, "{}", line) {
                log::warn!("failed to write event log line: {}", err);
            }
        }
    }
}

fn format_line(timestamp: &str, id: &str, category: Category, message: &str) -> String {
    let id = if id.is_empty() { "N/A" } else { id };
    format!("[{}] [{}] [{}] {}", timestamp, id, category.as_str(), message)
}
