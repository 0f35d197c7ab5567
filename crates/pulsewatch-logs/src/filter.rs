use std::collections::HashSet;

use regex::Regex;

use pulsewatch_types::{LogEntry, Severity};

/// Compiled filter for log entries
#[derive(Clone, Default)]
pub struct EntryFilter {
    /// Regex over the message text (if any)
    regex: Option<Regex>,

    /// Original pattern string
    pattern: String,

    /// Severities to include (empty = all)
    severities: HashSet<Severity>,

    /// Sources to include (empty = all)
    sources: HashSet<String>,
}

impl EntryFilter {
    /// Create a new filter from a pattern string
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = if pattern.is_empty() {
            None
        } else {
            Some(Regex::new(pattern)?)
        };

        Ok(Self {
            regex,
            pattern: pattern.to_string(),
            severities: HashSet::new(),
            sources: HashSet::new(),
        })
    }

    /// Filter matching every entry
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter matching a single severity
    pub fn severity(severity: Severity) -> Self {
        Self::all().with_severities(HashSet::from([severity]))
    }

    /// Set severities to filter by
    pub fn with_severities(mut self, severities: HashSet<Severity>) -> Self {
        self.severities = severities;
        self
    }

    /// Set sources to filter by
    pub fn with_sources(mut self, sources: HashSet<String>) -> Self {
        self.sources = sources;
        self
    }

    /// Check if a log entry matches this filter
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if !self.severities.is_empty() && !self.severities.contains(&entry.severity) {
            return false;
        }

        if !self.sources.is_empty() {
            match &entry.source {
                Some(source) if self.sources.contains(source) => {}
                _ => return false,
            }
        }

        match &self.regex {
            Some(re) => re.is_match(&entry.message),
            None => true,
        }
    }

    /// Get the original pattern
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Check if filter is empty (matches everything)
    pub fn is_empty(&self) -> bool {
        self.regex.is_none() && self.severities.is_empty() && self.sources.is_empty()
    }
}

impl std::fmt::Debug for EntryFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryFilter")
            .field("pattern", &self.pattern)
            .field("severities", &self.severities)
            .field("sources", &self.sources)
            .finish()
    }
}

/// Quick filter presets
pub struct FilterPresets;

impl FilterPresets {
    /// Filter for errors only
    pub fn errors_only() -> EntryFilter {
        EntryFilter::all().with_severities(HashSet::from([Severity::Error]))
    }

    /// Filter for warnings and above
    pub fn warnings_and_above() -> EntryFilter {
        EntryFilter::all().with_severities(HashSet::from([Severity::Error, Severity::Warning]))
    }
}
