//! Observability subsystem
//!
//! - Structured logging (JSON, one line per event, deterministic keys)
//! - Typed protocol events with default severities
//! - Lock-free replication counters
//!
//! Observability is read-only: nothing on the write path branches on it.
//!
//! # Usage
//!
//! ```ignore
//! use aerocache::observability::{log_event, Event};
//!
//! log_event(Event::BackupWaived, &[("id", "d:7"), ("backup", "c")]);
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsSnapshot, ReplicationMetrics};

/// Log an event at its default severity
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    let severity = event.severity();
    if !Logger::enabled(severity) {
        return;
    }
    if severity >= Severity::Error {
        Logger::log_stderr(severity, event.as_str(), fields);
    } else {
        Logger::log(severity, event.as_str(), fields);
    }
}
