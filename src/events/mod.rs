//! Structured progress events emitted by the controllers and the builder.
//!
//! The core never prints; it emits [`Event`]s into an [`EventBus`], and the
//! thin CLI front-end decides how to render them. The default [`LogSink`]
//! routes events through `tracing`; the binary installs a subscriber with a
//! standard-output layer and a daily-rolling log file layer, so every event
//! lands in both places.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Diagnostic detail (filter rejections, cookie updates).
    Debug,
    /// Normal progress.
    Info,
    /// Recoverable problems (asset fetch failures).
    Warning,
    /// Unit failures (book or skill level).
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// One structured progress event.
#[derive(Debug, Clone)]
pub struct Event {
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub level: Level,
    /// Component tag (e.g. `discovery`, `epub`, `batch`).
    pub component: &'static str,
    /// Human-readable message.
    pub message: String,
    /// Structured key/value payload.
    pub fields: Vec<(String, String)>,
}

impl Event {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(level: Level, component: &'static str, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    /// Attaches a structured field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }
}

/// Receiver of structured events.
pub trait EventSink: Send + Sync {
    /// Consumes one event. Must not block for long; heavy sinks should queue.
    fn emit(&self, event: &Event);
}

/// Fan-out distributor for events.
///
/// Built once at startup with the configured sinks and shared as
/// `Arc<EventBus>` by every controller.
#[derive(Default)]
pub struct EventBus {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventBus {
    /// Creates a bus with no sinks (events are dropped).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus with the default logging sink attached.
    #[must_use]
    pub fn with_default_sink() -> Self {
        let mut bus = Self::new();
        bus.register(Arc::new(LogSink));
        bus
    }

    /// Registers a sink.
    pub fn register(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Emits an event to every registered sink.
    pub fn emit(&self, event: &Event) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }

    /// Convenience: emit a debug event.
    pub fn debug(&self, component: &'static str, message: impl Into<String>) {
        self.emit(&Event::new(Level::Debug, component, message));
    }

    /// Convenience: emit an info event.
    pub fn info(&self, component: &'static str, message: impl Into<String>) {
        self.emit(&Event::new(Level::Info, component, message));
    }

    /// Convenience: emit a warning event.
    pub fn warning(&self, component: &'static str, message: impl Into<String>) {
        self.emit(&Event::new(Level::Warning, component, message));
    }

    /// Convenience: emit an error event.
    pub fn error(&self, component: &'static str, message: impl Into<String>) {
        self.emit(&Event::new(Level::Error, component, message));
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

/// Default sink: routes events through `tracing` at the matching level. The
/// subscriber the binary installs fans these out to standard output and the
/// rotating log file.
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &Event) {
        let fields = if event.fields.is_empty() {
            String::new()
        } else {
            let joined: Vec<String> = event
                .fields
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            format!(" [{}]", joined.join(" "))
        };
        match event.level {
            Level::Debug => debug!(component = event.component, "{}{}", event.message, fields),
            Level::Info => info!(component = event.component, "{}{}", event.message, fields),
            Level::Warning => warn!(component = event.component, "{}{}", event.message, fields),
            Level::Error => error!(component = event.component, "{}{}", event.message, fields),
        }
    }
}

/// Sink that retains every event in memory. Used by tests and the CLI
/// end-of-run summary.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<Event>>,
}

impl CollectingSink {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the collected events.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_bus_fans_out_to_all_sinks() {
        let first = Arc::new(CollectingSink::new());
        let second = Arc::new(CollectingSink::new());
        let mut bus = EventBus::new();
        bus.register(Arc::clone(&first) as Arc<dyn EventSink>);
        bus.register(Arc::clone(&second) as Arc<dyn EventSink>);

        bus.info("discovery", "skill done");

        assert_eq!(first.events().len(), 1);
        assert_eq!(second.events().len(), 1);
        assert_eq!(first.events()[0].message, "skill done");
    }

    #[test]
    fn test_event_with_fields() {
        let event = Event::new(Level::Info, "batch", "book complete")
            .with_field("id", "9781234567890")
            .with_field("skill", "Rust");

        assert_eq!(event.fields.len(), 2);
        assert_eq!(event.fields[0].0, "id");
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warning);
        assert!(Level::Warning < Level::Error);
    }

    #[test]
    fn test_empty_bus_drops_events() {
        let bus = EventBus::new();
        // Must not panic with no sinks registered
        bus.error("epub", "oops");
    }
}
