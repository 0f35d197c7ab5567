//! Backend clients for pulsewatch
//!
//! This crate talks to the log service: one-shot snapshot fetches over HTTP
//! and the persistent event stream over WebSocket.

mod snapshot;
mod stream;

pub use snapshot::{BackendError, SnapshotFetcher};
pub use stream::{ReconnectPolicy, StreamEvent, StreamManager};

// Re-export types that are used in our public API
pub use pulsewatch_types::{AggregateWindow, ConnectionState, LogEntry, Severity};
