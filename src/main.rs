use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use pulsewatch_logs::{CaptureBuffer, CaptureLayer, EntryFilter};
use pulsewatch_monitor::{LogMonitor, MonitorConfig};
use pulsewatch_types::{LogEntry, Severity};

/// Pulsewatch - live log and error stream monitor for the dashboard backend
#[derive(Parser, Debug)]
#[command(name = "pulsewatch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Backend base URL for snapshot fetches
    #[arg(long)]
    base_url: Option<String>,

    /// Backend stream URL
    #[arg(long)]
    stream_url: Option<String>,

    /// Only print entries with this severity (error|warning|info|debug)
    #[arg(long)]
    severity: Option<String>,

    /// Start with the periodic snapshot refresh enabled
    #[arg(long)]
    auto_refresh: bool,

    /// Override the capture file location
    #[arg(long)]
    capture_path: Option<PathBuf>,

    /// Print a stats summary every 30 seconds
    #[arg(long)]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => MonitorConfig::load(path)?,
        None => MonitorConfig::default(),
    };
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    if let Some(stream_url) = args.stream_url {
        config.stream_url = stream_url;
    }
    if let Some(capture_path) = args.capture_path {
        config.capture_path = Some(capture_path);
    }
    if args.auto_refresh {
        config.auto_refresh = true;
    }

    let filter = match &args.severity {
        Some(raw) => match Severity::parse(raw) {
            Some(severity) => EntryFilter::severity(severity),
            None => anyhow::bail!("unknown severity '{}'", raw),
        },
        None => EntryFilter::all(),
    };

    // The capture buffer doubles as the sink for our own warnings/errors
    let capture = match &config.capture_path {
        Some(path) => CaptureBuffer::new(path, config.capture_capacity),
        None => CaptureBuffer::with_default_path(config.capture_capacity),
    };

    // Initialize tracing for debugging; warnings and errors also land in
    // the capture buffer
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(CaptureLayer::new(capture.clone()))
        .init();

    let monitor = LogMonitor::start_with_capture(config, capture)?;
    let result = follow(&monitor, &filter, args.stats).await;
    monitor.stop();

    result
}

/// Headless follower: print new entries and connectivity changes until
/// interrupted
async fn follow(monitor: &LogMonitor, filter: &EntryFilter, stats: bool) -> Result<()> {
    let mut printed: HashSet<String> = HashSet::new();
    let mut last_state = monitor.connection_state();
    let mut last_fallback = monitor.is_fallback();
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    let mut stats_ticker = tokio::time::interval(Duration::from_secs(30));
    stats_ticker.tick().await; // first tick completes immediately

    println!("-- connection: {}", last_state.label());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            _ = ticker.tick() => {
                let state = monitor.connection_state();
                if state != last_state {
                    println!("-- connection: {}", state.label());
                    last_state = state;
                }

                let fallback = monitor.is_fallback();
                if fallback != last_fallback {
                    if fallback {
                        println!("-- backend unreachable, showing locally captured entries");
                    } else {
                        println!("-- backend restored, showing live entries");
                    }
                    last_fallback = fallback;
                }

                for entry in monitor.view(filter).iter().rev() {
                    if printed.insert(entry.id.clone()) {
                        print_entry(entry);
                    }
                }
            }

            _ = stats_ticker.tick(), if stats => {
                let window = monitor.stats();
                println!(
                    "-- stats: {} errors ({} last hour, {} last 24h), {} warnings",
                    window.total_errors,
                    window.errors_last_hour,
                    window.errors_last_day,
                    window.total_warnings,
                );
            }
        }
    }

    Ok(())
}

fn print_entry(entry: &LogEntry) {
    let timestamp = entry.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ");
    match &entry.source {
        Some(source) => println!(
            "{timestamp} [{}] {} | {}",
            entry.severity.as_str(),
            source,
            entry.message
        ),
        None => println!("{timestamp} [{}] {}", entry.severity.as_str(), entry.message),
    }
}
