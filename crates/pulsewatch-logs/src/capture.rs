//! Durable capture of process-local events
//!
//! Errors and warnings raised inside the client itself are recorded here so
//! an operator still sees something when the backend is unreachable. The
//! store is a bounded JSON file; writes are best-effort and never block or
//! fail the caller.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use pulsewatch_types::{LogEntry, Severity};

/// Default maximum number of captured entries
pub const DEFAULT_CAPTURE_CAPACITY: usize = 200;

/// Persisted record layout: id, timestamp, severity, source, message
#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredEntry {
    id: String,
    timestamp: DateTime<Utc>,
    severity: Severity,
    #[serde(default)]
    source: Option<String>,
    message: String,
}

impl StoredEntry {
    fn to_entry(&self) -> LogEntry {
        let mut entry = LogEntry::new(
            self.id.clone(),
            self.timestamp,
            self.severity,
            self.message.clone(),
        );
        entry.source = self.source.clone();
        entry
    }
}

/// On-disk capture store
#[derive(Debug, Default, Serialize, Deserialize)]
struct CaptureStore {
    entries: Vec<StoredEntry>,
}

/// Bounded, durable buffer of locally captured events
///
/// Constructed explicitly and injected where needed so tests can use
/// isolated instances. Oldest entries are evicted first once the capacity
/// is reached.
#[derive(Clone)]
pub struct CaptureBuffer {
    inner: Arc<Inner>,
}

struct Inner {
    path: Option<PathBuf>,
    capacity: usize,
    entries: Mutex<VecDeque<StoredEntry>>,
}

impl CaptureBuffer {
    /// Create a capture buffer backed by the given file
    ///
    /// An unreadable or corrupt file starts the buffer empty rather than
    /// failing.
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let path = path.into();
        let mut entries: VecDeque<StoredEntry> = fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str::<CaptureStore>(&content).ok())
            .map(|store| store.entries.into())
            .unwrap_or_default();
        while entries.len() > capacity {
            entries.pop_front();
        }

        Self {
            inner: Arc::new(Inner {
                path: Some(path),
                capacity,
                entries: Mutex::new(entries),
            }),
        }
    }

    /// Create a capture buffer at the default location
    ///
    /// Falls back to a memory-only buffer when no home directory is
    /// available.
    pub fn with_default_path(capacity: usize) -> Self {
        match default_path() {
            Some(path) => Self::new(path, capacity),
            None => Self {
                inner: Arc::new(Inner {
                    path: None,
                    capacity,
                    entries: Mutex::new(VecDeque::new()),
                }),
            },
        }
    }

    /// Record a locally observed event
    ///
    /// The id and timestamp are generated here; the write to disk is best
    /// effort and persistence failures are swallowed.
    pub fn capture(&self, severity: Severity, source: Option<&str>, message: &str) -> LogEntry {
        let stored = StoredEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            severity,
            source: source.map(str::to_string),
            message: message.to_string(),
        };
        let entry = stored.to_entry();

        let snapshot = {
            let mut entries = self.inner.entries.lock();
            entries.push_back(stored);
            while entries.len() > self.inner.capacity {
                entries.pop_front();
            }
            entries.iter().cloned().collect::<Vec<_>>()
        };
        self.persist(snapshot);

        entry
    }

    /// Get the most recent `limit` entries, newest first
    pub fn drain(&self, limit: usize) -> Vec<LogEntry> {
        self.inner
            .entries
            .lock()
            .iter()
            .rev()
            .take(limit)
            .map(StoredEntry::to_entry)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all captured entries, including the persisted copy
    pub fn clear(&self) {
        self.inner.entries.lock().clear();
        self.persist(Vec::new());
    }

    fn persist(&self, entries: Vec<StoredEntry>) {
        let Some(path) = &self.inner.path else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let store = CaptureStore { entries };
        match serde_json::to_string(&store) {
            Ok(content) => {
                if let Err(e) = fs::write(path, content) {
                    debug!("capture persist failed: {e}");
                }
            }
            Err(e) => debug!("capture encode failed: {e}"),
        }
    }
}

/// Default capture file location
fn default_path() -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    Some(home.join(".pulsewatch").join("capture.json"))
}

/// Tracing layer forwarding process-local warnings and errors into a
/// capture buffer
///
/// Install alongside the normal fmt subscriber; events below WARN are
/// ignored.
pub struct CaptureLayer {
    buffer: CaptureBuffer,
}

impl CaptureLayer {
    pub fn new(buffer: CaptureBuffer) -> Self {
        Self { buffer }
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for CaptureLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }
        let severity = if level == tracing::Level::ERROR {
            Severity::Error
        } else {
            Severity::Warning
        };

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.buffer
            .capture(severity, Some(event.metadata().target()), &visitor.message);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_buffer(capacity: usize) -> (tempfile::TempDir, CaptureBuffer) {
        let dir = tempfile::tempdir().unwrap();
        let buffer = CaptureBuffer::new(dir.path().join("capture.json"), capacity);
        (dir, buffer)
    }

    #[test]
    fn test_drain_newest_first() {
        let (_dir, buffer) = temp_buffer(10);
        buffer.capture(Severity::Error, Some("api/posts"), "first");
        buffer.capture(Severity::Warning, None, "second");

        let drained = buffer.drain(10);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].message, "second");
        assert_eq!(drained[1].message, "first");
        assert_eq!(drained[1].source.as_deref(), Some("api/posts"));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let (_dir, buffer) = temp_buffer(3);
        for i in 0..5 {
            buffer.capture(Severity::Info, None, &format!("m{i}"));
        }

        let drained = buffer.drain(usize::MAX);
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].message, "m4");
        assert_eq!(drained[2].message, "m2");
    }

    #[test]
    fn test_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.json");

        let buffer = CaptureBuffer::new(&path, 10);
        buffer.capture(Severity::Error, None, "persisted");
        drop(buffer);

        let reloaded = CaptureBuffer::new(&path, 10);
        let drained = reloaded.drain(10);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].message, "persisted");
        assert_eq!(drained[0].severity, Severity::Error);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.json");
        fs::write(&path, "{ not json").unwrap();

        let buffer = CaptureBuffer::new(&path, 10);
        assert!(buffer.is_empty());
        // And it recovers on the next write
        buffer.capture(Severity::Warning, None, "fresh");
        assert_eq!(CaptureBuffer::new(&path, 10).len(), 1);
    }

    #[test]
    fn test_unwritable_path_is_swallowed() {
        let buffer = CaptureBuffer::new("/nonexistent-root/deep/capture.json", 10);
        let entry = buffer.capture(Severity::Error, None, "still recorded");
        assert!(!entry.id.is_empty());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_clear_removes_persisted_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.json");

        let buffer = CaptureBuffer::new(&path, 10);
        buffer.capture(Severity::Error, None, "gone soon");
        buffer.clear();

        assert!(buffer.is_empty());
        assert!(CaptureBuffer::new(&path, 10).is_empty());
    }

    #[test]
    fn test_capture_layer_records_warnings_and_errors() {
        use tracing_subscriber::layer::SubscriberExt;

        let (_dir, buffer) = temp_buffer(10);
        let subscriber =
            tracing_subscriber::registry().with(CaptureLayer::new(buffer.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("backend exploded");
            tracing::warn!("backend wobbly");
            tracing::info!("all quiet");
        });

        let drained = buffer.drain(10);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].severity, Severity::Warning);
        assert_eq!(drained[0].message, "backend wobbly");
        assert_eq!(drained[1].severity, Severity::Error);
        assert_eq!(drained[1].message, "backend exploded");
        assert!(drained[1].source.is_some());
    }
}
