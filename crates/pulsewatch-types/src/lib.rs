//! Shared types for pulsewatch
//!
//! This crate contains data structures used across multiple pulsewatch crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Log Types
// ============================================================================

/// Log severity level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    #[default]
    Info,
    Debug,
}

impl Severity {
    /// Parse a severity from common spellings
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error" | "err" => Some(Self::Error),
            "warning" | "warn" => Some(Self::Warning),
            "info" | "information" => Some(Self::Info),
            "debug" | "dbg" => Some(Self::Debug),
            _ => None,
        }
    }

    /// Short display string (3 chars)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERR",
            Self::Warning => "WRN",
            Self::Info => "INF",
            Self::Debug => "DBG",
        }
    }

    /// Value used in backend query strings
    pub fn as_query(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

/// A single observed log event
///
/// Entries are never mutated after insertion into a buffer; they are only
/// evicted. `id` is unique within a buffer's lifetime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unique entry id
    pub id: String,

    /// When the event was observed
    pub timestamp: DateTime<Utc>,

    /// Detected severity
    pub severity: Severity,

    /// Originating endpoint or module, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Human-readable message
    pub message: String,

    /// Opaque structured payload attached by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with minimal fields
    pub fn new(id: String, timestamp: DateTime<Utc>, severity: Severity, message: String) -> Self {
        Self {
            id,
            timestamp,
            severity,
            source: None,
            message,
            details: None,
        }
    }

    /// Attach a source
    pub fn with_source(mut self, source: String) -> Self {
        self.source = Some(source);
        self
    }
}

// ============================================================================
// Connection Types
// ============================================================================

/// State of the backend stream connection
///
/// Exactly one value holds at any instant; transitions are driven by the
/// stream connection manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    /// Label for the connectivity indicator
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

// ============================================================================
// Stats Types
// ============================================================================

/// Count of entries attributed to one source
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCount {
    pub source: String,
    pub count: usize,
}

/// Rolling aggregate counts over the current log window
///
/// Returned by the backend stats endpoint and derived locally from the
/// aggregator's event flow when the backend is unavailable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateWindow {
    pub total_errors: usize,
    pub total_warnings: usize,
    pub errors_last_hour: usize,
    pub errors_last_day: usize,
    #[serde(default)]
    pub top_sources: Vec<SourceCount>,
}

// ============================================================================
// Wire Types
// ============================================================================

/// A message received on the backend event stream
///
/// The stream delivers a tagged union; heartbeat acknowledgements carry no
/// entry payload.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamMessage {
    Error { data: LogEntry },
    Warning { data: LogEntry },
    HeartbeatAck,
}

impl StreamMessage {
    /// Extract the log entry, if this message carries one
    pub fn into_entry(self) -> Option<LogEntry> {
        match self {
            Self::Error { data } | Self::Warning { data } => Some(data),
            Self::HeartbeatAck => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_severity() {
        assert_eq!(Severity::parse("error"), Some(Severity::Error));
        assert_eq!(Severity::parse("WARN"), Some(Severity::Warning));
        assert_eq!(Severity::parse("Info"), Some(Severity::Info));
        assert_eq!(Severity::parse("nope"), None);
    }

    #[test]
    fn test_log_entry_roundtrip() {
        let entry = LogEntry::new(
            "e-1".to_string(),
            Utc::now(),
            Severity::Error,
            "request failed".to_string(),
        )
        .with_source("api/posts".to_string());

        let json = serde_json::to_string(&entry).unwrap();
        let back: LogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_log_entry_optional_fields_default() {
        let json = r#"{"id":"e-2","timestamp":"2024-01-15T10:30:00Z","severity":"warning","message":"slow"}"#;
        let entry: LogEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.severity, Severity::Warning);
        assert!(entry.source.is_none());
        assert!(entry.details.is_none());
    }

    #[test]
    fn test_stream_message_entry() {
        let json = r#"{"type":"error","data":{"id":"e-3","timestamp":"2024-01-15T10:30:00Z","severity":"error","message":"boom"}}"#;
        let msg: StreamMessage = serde_json::from_str(json).unwrap();
        let entry = msg.into_entry().unwrap();
        assert_eq!(entry.id, "e-3");
    }

    #[test]
    fn test_stream_message_heartbeat() {
        let json = r#"{"type":"heartbeat-ack"}"#;
        let msg: StreamMessage = serde_json::from_str(json).unwrap();
        assert!(msg.into_entry().is_none());
    }

    #[test]
    fn test_stream_message_malformed() {
        assert!(serde_json::from_str::<StreamMessage>("not json").is_err());
        assert!(serde_json::from_str::<StreamMessage>(r#"{"type":"unknown"}"#).is_err());
    }
}
