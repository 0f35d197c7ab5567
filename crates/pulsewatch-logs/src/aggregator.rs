use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use pulsewatch_types::{AggregateWindow, LogEntry};

use crate::stats::StatsEngine;

/// Default number of entries held in the merged view
pub const DEFAULT_CAPACITY: usize = 100;

/// Single merged, bounded, deduplicated view of log entries
///
/// The aggregator owns the ring buffer fed by snapshot fetches and the
/// event stream: ordered newest first, deduplicated by id, evicted strictly
/// oldest first once capacity is reached. While in fallback mode readers
/// are served from a separate view populated from the local capture buffer;
/// the primary buffer is left untouched so nothing is lost across fallback
/// transitions.
#[derive(Clone)]
pub struct LogAggregator {
    inner: Arc<Inner>,
}

struct Inner {
    capacity: usize,
    primary: RwLock<Buffer>,
    fallback: RwLock<Vec<LogEntry>>,
    fallback_mode: AtomicBool,
    stats: StatsEngine,
}

#[derive(Default)]
struct Buffer {
    /// Entries ordered newest first
    entries: VecDeque<LogEntry>,
    /// Ids currently present in `entries`
    ids: HashSet<String>,
}

impl LogAggregator {
    /// Create a new aggregator with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity,
                primary: RwLock::new(Buffer::default()),
                fallback: RwLock::new(Vec::new()),
                fallback_mode: AtomicBool::new(false),
                stats: StatsEngine::new(),
            }),
        }
    }

    /// Merge a snapshot page into the view
    ///
    /// Commutative and idempotent: entries already present are skipped, and
    /// the resulting buffer does not depend on how the snapshot interleaved
    /// with streamed arrivals.
    pub fn ingest_snapshot(&self, entries: Vec<LogEntry>) {
        let mut buf = self.inner.primary.write();
        for entry in entries {
            if buf.ids.contains(&entry.id) {
                continue;
            }
            buf.ids.insert(entry.id.clone());
            self.inner.stats.on_insert(entry.severity);
            buf.entries.push_back(entry);
        }
        buf.entries
            .make_contiguous()
            .sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        self.evict_over_capacity(&mut buf);
    }

    /// Insert one streamed entry at its timestamp position
    pub fn ingest_streamed(&self, entry: LogEntry) {
        let mut buf = self.inner.primary.write();
        if buf.ids.contains(&entry.id) {
            return;
        }
        buf.ids.insert(entry.id.clone());
        self.inner.stats.on_insert(entry.severity);
        let pos = buf
            .entries
            .iter()
            .position(|e| e.timestamp <= entry.timestamp)
            .unwrap_or(buf.entries.len());
        buf.entries.insert(pos, entry);
        self.evict_over_capacity(&mut buf);
    }

    /// Eviction is always strict recency order, oldest first
    fn evict_over_capacity(&self, buf: &mut Buffer) {
        while buf.entries.len() > self.inner.capacity {
            if let Some(evicted) = buf.entries.pop_back() {
                buf.ids.remove(&evicted.id);
                self.inner.stats.on_evict(evicted.severity);
            }
        }
    }

    /// Get all entries in the active view, newest first
    pub fn all(&self) -> Vec<LogEntry> {
        if self.is_fallback() {
            self.inner.fallback.read().clone()
        } else {
            self.inner.primary.read().entries.iter().cloned().collect()
        }
    }

    /// Get entries in the active view matching a predicate
    pub fn view<F>(&self, predicate: F) -> Vec<LogEntry>
    where
        F: Fn(&LogEntry) -> bool,
    {
        if self.is_fallback() {
            self.inner
                .fallback
                .read()
                .iter()
                .filter(|e| predicate(e))
                .cloned()
                .collect()
        } else {
            self.inner
                .primary
                .read()
                .entries
                .iter()
                .filter(|e| predicate(e))
                .cloned()
                .collect()
        }
    }

    /// Entry count of the active view
    pub fn len(&self) -> usize {
        if self.is_fallback() {
            self.inner.fallback.read().len()
        } else {
            self.inner.primary.read().entries.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate counts over the active view
    pub fn window(&self, now: DateTime<Utc>) -> AggregateWindow {
        if self.is_fallback() {
            StatsEngine::scan(self.inner.fallback.read().iter(), now)
        } else {
            let primary = self.inner.primary.read();
            self.inner.stats.window(primary.entries.iter(), now)
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.inner.fallback_mode.load(Ordering::Relaxed)
    }

    /// Serve readers from the fallback view until a primary source recovers
    pub fn enter_fallback(&self) {
        if !self.inner.fallback_mode.swap(true, Ordering::Relaxed) {
            debug!("aggregator entering fallback mode");
        }
    }

    /// Return readers to the primary buffer
    pub fn exit_fallback(&self) {
        if self.inner.fallback_mode.swap(false, Ordering::Relaxed) {
            debug!("aggregator leaving fallback mode");
            self.inner.fallback.write().clear();
        }
    }

    /// Replace the fallback view with locally captured entries
    pub fn load_fallback(&self, mut entries: Vec<LogEntry>) {
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(self.inner.capacity);
        *self.inner.fallback.write() = entries;
    }
}
