use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use pulsewatch_types::{AggregateWindow, LogEntry, Severity};

/// Errors returned by snapshot fetches
///
/// Never fatal: the caller decides whether to retry or degrade to the
/// local capture buffer.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend could not be reached
    #[error("backend unavailable: {0}")]
    Unavailable(#[from] reqwest::Error),

    /// The backend answered with a non-success status
    #[error("backend returned status {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, Deserialize)]
struct LogsResponse {
    logs: Vec<LogEntry>,
}

/// One-shot fetches of recent entries and aggregate stats
///
/// Pure request/response with no retry built in.
pub struct SnapshotFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl SnapshotFetcher {
    /// Create a fetcher for the given backend base URL
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Fetch a page of recent log entries
    pub async fn fetch_entries(
        &self,
        severity: Option<Severity>,
        limit: usize,
    ) -> Result<Vec<LogEntry>, BackendError> {
        let type_param = severity.as_ref().map(Severity::as_query).unwrap_or("all");
        let response = self
            .client
            .get(format!("{}/logs", self.base_url))
            .query(&[("type", type_param.to_string()), ("limit", limit.to_string())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::Status(response.status()));
        }

        let body: LogsResponse = response.json().await?;
        Ok(body.logs)
    }

    /// Fetch the backend's aggregate stats window
    pub async fn fetch_stats(&self) -> Result<AggregateWindow, BackendError> {
        let response = self
            .client
            .get(format!("{}/logs/stats", self.base_url))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::Status(response.status()));
        }

        Ok(response.json().await?)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}
