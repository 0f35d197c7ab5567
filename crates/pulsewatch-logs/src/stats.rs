use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Duration, Utc};

use pulsewatch_types::{AggregateWindow, LogEntry, Severity, SourceCount};

/// Number of sources reported in an aggregate window
const TOP_SOURCES: usize = 5;

/// Lock-free severity totals maintained on insert/evict notifications
#[derive(Default)]
struct AtomicSeverityCounts {
    errors: AtomicUsize,
    warnings: AtomicUsize,
}

impl AtomicSeverityCounts {
    fn increment(&self, severity: Severity) {
        match severity {
            Severity::Error => self.errors.fetch_add(1, Ordering::Relaxed),
            Severity::Warning => self.warnings.fetch_add(1, Ordering::Relaxed),
            _ => return,
        };
    }

    fn decrement(&self, severity: Severity) {
        match severity {
            Severity::Error => self.errors.fetch_sub(1, Ordering::Relaxed),
            Severity::Warning => self.warnings.fetch_sub(1, Ordering::Relaxed),
            _ => return,
        };
    }
}

/// Incrementally maintained aggregate counts
///
/// Severity totals are updated on every insert/evict notification from the
/// aggregator. Rolling windows and top sources are computed at read time by
/// scanning the buffer; the buffer is small and bounded, so the scan stays
/// cheap and no time-bucketed counters need to be kept in sync.
#[derive(Default)]
pub struct StatsEngine {
    totals: AtomicSeverityCounts,
}

impl StatsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notification: an entry entered the buffer
    pub fn on_insert(&self, severity: Severity) {
        self.totals.increment(severity);
    }

    /// Notification: an entry was evicted from the buffer
    pub fn on_evict(&self, severity: Severity) {
        self.totals.decrement(severity);
    }

    /// Assemble the window for the given buffer contents
    pub fn window<'a, I>(&self, entries: I, now: DateTime<Utc>) -> AggregateWindow
    where
        I: IntoIterator<Item = &'a LogEntry>,
    {
        let rolled = tally(entries, now);
        AggregateWindow {
            total_errors: self.totals.errors.load(Ordering::Relaxed),
            total_warnings: self.totals.warnings.load(Ordering::Relaxed),
            errors_last_hour: rolled.errors_last_hour,
            errors_last_day: rolled.errors_last_day,
            top_sources: rolled.top_sources,
        }
    }

    /// Compute a window entirely from the given entries
    ///
    /// Used for the fallback view, which is not fed through insert/evict
    /// notifications.
    pub fn scan<'a, I>(entries: I, now: DateTime<Utc>) -> AggregateWindow
    where
        I: IntoIterator<Item = &'a LogEntry>,
    {
        let rolled = tally(entries, now);
        AggregateWindow {
            total_errors: rolled.errors,
            total_warnings: rolled.warnings,
            errors_last_hour: rolled.errors_last_hour,
            errors_last_day: rolled.errors_last_day,
            top_sources: rolled.top_sources,
        }
    }
}

struct Tally {
    errors: usize,
    warnings: usize,
    errors_last_hour: usize,
    errors_last_day: usize,
    top_sources: Vec<SourceCount>,
}

/// Single pass over the buffer: rolling error counts plus source totals
fn tally<'a, I>(entries: I, now: DateTime<Utc>) -> Tally
where
    I: IntoIterator<Item = &'a LogEntry>,
{
    let hour_ago = now - Duration::hours(1);
    let day_ago = now - Duration::hours(24);

    let mut errors = 0;
    let mut warnings = 0;
    let mut errors_last_hour = 0;
    let mut errors_last_day = 0;
    let mut sources: HashMap<&str, usize> = HashMap::new();

    for entry in entries {
        match entry.severity {
            Severity::Error => {
                errors += 1;
                if entry.timestamp >= hour_ago {
                    errors_last_hour += 1;
                }
                if entry.timestamp >= day_ago {
                    errors_last_day += 1;
                }
            }
            Severity::Warning => warnings += 1,
            _ => {}
        }
        if let Some(source) = &entry.source {
            *sources.entry(source.as_str()).or_default() += 1;
        }
    }

    let mut top_sources: Vec<SourceCount> = sources
        .into_iter()
        .map(|(source, count)| SourceCount {
            source: source.to_string(),
            count,
        })
        .collect();
    top_sources.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.source.cmp(&b.source)));
    top_sources.truncate(TOP_SOURCES);

    Tally {
        errors,
        warnings,
        errors_last_hour,
        errors_last_day,
        top_sources,
    }
}
