//! Process-wide bounded log ring, fed by a `tracing_subscriber::Layer` so
//! every `tracing::info!/warn!/error!` call lands in it automatically —
//! mirroring the source's `logging.Handler` attached directly to the root
//! logger, rather than a second call threaded through every call site.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Fixed-capacity ring of recent log entries. Writes never block; readers
/// take a snapshot (a clone of the current contents).
#[derive(Debug, Clone)]
pub struct LogRing {
    inner: Arc<Mutex<VecDeque<LogEntry>>>,
    capacity: usize,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, level: LogLevel, message: String) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if guard.len() >= self.capacity {
            guard.pop_front();
        }
        guard.push_back(LogEntry {
            timestamp: Utc::now(),
            level,
            message,
        });
    }

    /// Snapshot of the ring's current contents, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for LogRing {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = match *event.metadata().level() {
            tracing::Level::ERROR => LogLevel::Error,
            tracing::Level::WARN => LogLevel::Warn,
            _ => LogLevel::Info,
        };

        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.push(level, visitor.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_drops_oldest_once_at_capacity() {
        let ring = LogRing::new(2);
        ring.push(LogLevel::Info, "one".into());
        ring.push(LogLevel::Info, "two".into());
        ring.push(LogLevel::Info, "three".into());

        let snap = ring.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].message, "two");
        assert_eq!(snap[1].message, "three");
    }

    #[test]
    fn snapshot_is_independent_of_later_writes() {
        let ring = LogRing::new(10);
        ring.push(LogLevel::Info, "one".into());
        let snap = ring.snapshot();
        ring.push(LogLevel::Info, "two".into());
        assert_eq!(snap.len(), 1);
    }
}
