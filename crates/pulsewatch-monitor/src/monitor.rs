use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use pulsewatch_backend::{ReconnectPolicy, SnapshotFetcher, StreamEvent, StreamManager};
use pulsewatch_logs::{CaptureBuffer, EntryFilter, ExportFormat, LogAggregator};
use pulsewatch_types::{AggregateWindow, ConnectionState, LogEntry, Severity};

use crate::config::MonitorConfig;

/// Cadence for polling the capture buffer while in fallback
const FALLBACK_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Commands accepted by the monitor loop
enum Command {
    Refresh,
    AutoRefresh(bool),
}

/// Completion of a dispatched snapshot fetch, re-entering the loop as a
/// message
enum FetchOutcome {
    Entries(Vec<LogEntry>),
    Stats(AggregateWindow),
    Failed,
}

/// The query facade over the live log view
///
/// Owns the stream connection, the aggregator, and the local capture
/// buffer, and runs one cooperative event loop over connection events,
/// timers, and facade commands. Total backend loss degrades to serving
/// locally captured entries; nothing in here is fatal.
pub struct LogMonitor {
    aggregator: LogAggregator,
    capture: CaptureBuffer,
    backend_stats: Arc<RwLock<Option<AggregateWindow>>>,
    stream: Mutex<StreamManager>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
}

impl LogMonitor {
    /// Start the monitor: connect the stream, schedule the cold-start
    /// snapshot, and return the facade. Must be called from within a Tokio
    /// runtime.
    pub fn start(config: MonitorConfig) -> Result<Self> {
        let capture = match &config.capture_path {
            Some(path) => CaptureBuffer::new(path, config.capture_capacity),
            None => CaptureBuffer::with_default_path(config.capture_capacity),
        };
        Self::start_with_capture(config, capture)
    }

    /// Start the monitor around an existing capture buffer
    ///
    /// Used when the same buffer is also wired into a `CaptureLayer`.
    pub fn start_with_capture(config: MonitorConfig, capture: CaptureBuffer) -> Result<Self> {
        let aggregator = LogAggregator::new(config.capacity);
        let fetcher = Arc::new(SnapshotFetcher::new(
            config.base_url.clone(),
            config.request_timeout(),
        )?);

        let policy = if config.exponential_backoff {
            ReconnectPolicy::exponential(config.reconnect_delay())
        } else {
            ReconnectPolicy::fixed(config.reconnect_delay())
        };

        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
        let stream = StreamManager::start(
            config.stream_url.clone(),
            policy,
            config.keepalive(),
            stream_tx,
        );

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let backend_stats = Arc::new(RwLock::new(None));
        let cancel = CancellationToken::new();

        tokio::spawn(run_monitor(MonitorLoop {
            fetcher,
            aggregator: aggregator.clone(),
            capture: capture.clone(),
            backend_stats: Arc::clone(&backend_stats),
            stream_rx,
            cmd_rx,
            cancel: cancel.clone(),
            snapshot_limit: config.snapshot_limit,
            capacity: config.capacity,
            auto_refresh: config.auto_refresh,
            auto_refresh_interval: config.auto_refresh_interval(),
        }));

        // Cold start: populate the view from a snapshot
        let _ = cmd_tx.send(Command::Refresh);

        Ok(Self {
            aggregator,
            capture,
            backend_stats,
            stream: Mutex::new(stream),
            cmd_tx,
            cancel,
        })
    }

    /// Entries in the current view matching the filter, newest first
    pub fn view(&self, filter: &EntryFilter) -> Vec<LogEntry> {
        self.aggregator.view(|e| filter.matches(e))
    }

    /// Current aggregate stats
    ///
    /// The backend's window is served while primary sources are healthy;
    /// the locally derived window is served in fallback and before the
    /// first successful stats fetch.
    pub fn stats(&self) -> AggregateWindow {
        if !self.is_fallback() {
            if let Some(window) = self.backend_stats.read().clone() {
                return window;
            }
        }
        self.aggregator.window(Utc::now())
    }

    /// Whether the view is currently served from the local capture buffer
    pub fn is_fallback(&self) -> bool {
        self.aggregator.is_fallback()
    }

    /// State of the stream connection
    pub fn connection_state(&self) -> ConnectionState {
        self.stream.lock().state()
    }

    /// Force a snapshot fetch plus stats refresh
    ///
    /// Fire-and-forget and idempotent: safe to call repeatedly and
    /// concurrently with streamed ingestion, and it never blocks stream
    /// processing.
    pub fn refresh(&self) {
        let _ = self.cmd_tx.send(Command::Refresh);
    }

    /// Enable or disable the periodic snapshot refresh
    pub fn toggle_auto_refresh(&self, enabled: bool) {
        let _ = self.cmd_tx.send(Command::AutoRefresh(enabled));
    }

    /// Export the current view
    pub fn export(&self, format: ExportFormat) -> Vec<u8> {
        pulsewatch_logs::export(&self.aggregator.all(), format)
    }

    /// Record a process-local event into the capture buffer
    pub fn capture_local(
        &self,
        severity: Severity,
        source: Option<&str>,
        message: &str,
    ) -> LogEntry {
        self.capture.capture(severity, source, message)
    }

    /// The capture buffer backing this monitor, for wiring a `CaptureLayer`
    pub fn capture_buffer(&self) -> CaptureBuffer {
        self.capture.clone()
    }

    /// Stop the monitor: close the stream, cancel all timers, and discard
    /// any in-flight fetch completion. Calling this more than once is a
    /// no-op.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.stream.lock().stop();
    }
}

impl Drop for LogMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

struct MonitorLoop {
    fetcher: Arc<SnapshotFetcher>,
    aggregator: LogAggregator,
    capture: CaptureBuffer,
    backend_stats: Arc<RwLock<Option<AggregateWindow>>>,
    stream_rx: mpsc::UnboundedReceiver<StreamEvent>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
    snapshot_limit: usize,
    capacity: usize,
    auto_refresh: bool,
    auto_refresh_interval: Duration,
}

/// The single cooperative loop: connection events, timers, and facade
/// commands run as discrete non-overlapping tasks; snapshot fetches are
/// dispatched and their completions re-enter the loop as messages.
async fn run_monitor(mut ml: MonitorLoop) {
    let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
    let mut stream_up = false;
    let mut refresh_timer = tokio::time::interval(ml.auto_refresh_interval);
    let mut fallback_timer = tokio::time::interval(FALLBACK_POLL_INTERVAL);

    loop {
        tokio::select! {
            biased;

            _ = ml.cancel.cancelled() => break,

            Some(event) = ml.stream_rx.recv() => match event {
                StreamEvent::Opened => {
                    stream_up = true;
                }
                StreamEvent::Entry(entry) => {
                    // A live message also clears fallback
                    ml.aggregator.exit_fallback();
                    ml.aggregator.ingest_streamed(entry);
                }
                StreamEvent::Closed => {
                    stream_up = false;
                }
            },

            Some(command) = ml.cmd_rx.recv() => match command {
                Command::Refresh => spawn_fetch(&ml.fetcher, &outcome_tx, ml.snapshot_limit),
                Command::AutoRefresh(enabled) => ml.auto_refresh = enabled,
            },

            Some(outcome) = outcome_rx.recv() => match outcome {
                FetchOutcome::Entries(entries) => {
                    ml.aggregator.exit_fallback();
                    ml.aggregator.ingest_snapshot(entries);
                }
                FetchOutcome::Stats(window) => {
                    *ml.backend_stats.write() = Some(window);
                }
                FetchOutcome::Failed => {
                    // Fallback requires both primary sources to be down
                    if !stream_up && !ml.aggregator.is_fallback() {
                        warn!("backend unreachable and stream down; serving locally captured entries");
                        ml.aggregator.enter_fallback();
                        ml.aggregator.load_fallback(ml.capture.drain(ml.capacity));
                    }
                }
            },

            _ = refresh_timer.tick() => {
                if ml.auto_refresh {
                    spawn_fetch(&ml.fetcher, &outcome_tx, ml.snapshot_limit);
                }
            }

            _ = fallback_timer.tick() => {
                if ml.aggregator.is_fallback() {
                    ml.aggregator.load_fallback(ml.capture.drain(ml.capacity));
                }
            }
        }
    }
}

/// Dispatch a snapshot fetch without blocking the loop
fn spawn_fetch(
    fetcher: &Arc<SnapshotFetcher>,
    outcome_tx: &mpsc::UnboundedSender<FetchOutcome>,
    limit: usize,
) {
    let fetcher = Arc::clone(fetcher);
    let outcome_tx = outcome_tx.clone();
    tokio::spawn(async move {
        match fetcher.fetch_entries(None, limit).await {
            Ok(entries) => {
                let _ = outcome_tx.send(FetchOutcome::Entries(entries));
            }
            Err(e) => {
                debug!("snapshot fetch failed: {e}");
                let _ = outcome_tx.send(FetchOutcome::Failed);
                return;
            }
        }
        match fetcher.fetch_stats().await {
            Ok(window) => {
                let _ = outcome_tx.send(FetchOutcome::Stats(window));
            }
            Err(e) => debug!("stats fetch failed: {e}"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// An address that refuses connections
    async fn closed_addr() -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let end = tokio::time::Instant::now() + deadline;
        while tokio::time::Instant::now() < end {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_total_backend_loss_degrades_to_captured_entries() {
        let dir = tempfile::tempdir().unwrap();
        let capture_path = dir.path().join("capture.json");

        // Captured before the monitor starts; loaded back from disk
        let seed = CaptureBuffer::new(&capture_path, 10);
        seed.capture(Severity::Error, Some("scheduler"), "tick failed");
        seed.capture(Severity::Warning, None, "queue backlog");
        drop(seed);

        let dead = closed_addr().await;
        let config = MonitorConfig {
            base_url: format!("http://{dead}"),
            stream_url: format!("ws://{dead}"),
            capture_path: Some(capture_path),
            ..MonitorConfig::default()
        };

        let monitor = LogMonitor::start(config).unwrap();
        monitor.refresh();

        assert!(
            wait_until(Duration::from_secs(5), || monitor.is_fallback()).await,
            "fallback never engaged"
        );
        assert!(
            wait_until(Duration::from_secs(5), || monitor
                .view(&EntryFilter::all())
                .len()
                == 2)
            .await,
            "captured entries never surfaced"
        );

        let view = monitor.view(&EntryFilter::all());
        assert_eq!(view[0].message, "queue backlog");
        assert_eq!(view[1].source.as_deref(), Some("scheduler"));
        assert!(!monitor.connection_state().is_connected());

        // Stats are computed entirely from locally captured entries
        let stats = monitor.stats();
        assert_eq!(stats.total_errors, 1);
        assert_eq!(stats.total_warnings, 1);

        // New local events surface through the fallback poll
        monitor.capture_local(Severity::Error, Some("export"), "csv write failed");
        assert!(
            wait_until(Duration::from_secs(5), || monitor
                .view(&EntryFilter::all())
                .len()
                == 3)
            .await,
            "freshly captured entry never surfaced"
        );

        monitor.stop();
        monitor.stop();
    }

    #[tokio::test]
    async fn test_snapshot_feeds_view_and_backend_stats_win() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Minimal canned backend: answers /logs and /logs/stats
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = [0u8; 4096];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let body = if request.contains("/logs/stats") {
                    r#"{"total_errors":7,"total_warnings":2,"errors_last_hour":1,"errors_last_day":7,"top_sources":[]}"#
                } else {
                    r#"{"logs":[{"id":"s-1","timestamp":"2024-01-15T10:30:00Z","severity":"error","message":"from snapshot"}]}"#
                };
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len(),
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let dead = closed_addr().await;
        let config = MonitorConfig {
            base_url: format!("http://{addr}"),
            stream_url: format!("ws://{dead}"),
            capture_path: Some(dir.path().join("capture.json")),
            ..MonitorConfig::default()
        };

        let monitor = LogMonitor::start(config).unwrap();

        assert!(
            wait_until(Duration::from_secs(5), || !monitor
                .view(&EntryFilter::all())
                .is_empty())
            .await,
            "snapshot never surfaced"
        );
        assert!(!monitor.is_fallback());
        assert_eq!(monitor.view(&EntryFilter::all())[0].id, "s-1");

        // The backend window is authoritative while sources are healthy
        assert!(
            wait_until(Duration::from_secs(5), || monitor.stats().total_errors == 7).await,
            "backend stats never surfaced"
        );

        let exported = monitor.export(ExportFormat::Json);
        let parsed: Vec<LogEntry> = serde_json::from_slice(&exported).unwrap();
        assert_eq!(parsed, monitor.view(&EntryFilter::all()));

        monitor.stop();
    }

    #[tokio::test]
    async fn test_auto_refresh_keeps_fetching() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let served = Arc::clone(&hits);
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                served.fetch_add(1, Ordering::Relaxed);
                let mut buf = [0u8; 4096];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let body = if request.contains("/logs/stats") {
                    r#"{"total_errors":0,"total_warnings":0,"errors_last_hour":0,"errors_last_day":0,"top_sources":[]}"#
                } else {
                    r#"{"logs":[]}"#
                };
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len(),
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let dead = closed_addr().await;
        let config = MonitorConfig {
            base_url: format!("http://{addr}"),
            stream_url: format!("ws://{dead}"),
            capture_path: Some(dir.path().join("capture.json")),
            auto_refresh_secs: 1,
            ..MonitorConfig::default()
        };

        let monitor = LogMonitor::start(config).unwrap();
        monitor.toggle_auto_refresh(true);

        // Cold start is one fetch; the periodic refresh keeps adding more
        let check = Arc::clone(&hits);
        assert!(
            wait_until(Duration::from_secs(10), || check.load(Ordering::Relaxed) >= 6).await,
            "auto refresh never kept fetching"
        );

        monitor.stop();
    }
}
