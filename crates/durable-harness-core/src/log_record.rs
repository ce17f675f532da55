//! Captured log entries.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity of a captured log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Information,
    Warning,
    Error,
    Critical,
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Self::Trace,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Information,
            tracing::Level::WARN => Self::Warning,
            tracing::Level::ERROR => Self::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trace => write!(f, "Trace"),
            Self::Debug => write!(f, "Debug"),
            Self::Information => write!(f, "Information"),
            Self::Warning => write!(f, "Warning"),
            Self::Error => write!(f, "Error"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

/// Event identifier attached to a log entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId {
    pub id: i32,
    pub name: Option<String>,
}

impl EventId {
    #[must_use]
    pub fn new(id: i32) -> Self {
        Self { id, name: None }
    }

    #[must_use]
    pub fn named(id: i32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: Some(name.into()),
        }
    }
}

/// Error attached to a log entry, flattened to its message chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogError {
    /// Top-level error message.
    pub message: String,
    /// Messages of the `source()` chain, outermost first.
    pub sources: Vec<String>,
}

impl LogError {
    /// Capture an error and its source chain.
    #[must_use]
    pub fn capture(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut sources = Vec::new();
        let mut next = error.source();
        while let Some(source) = next {
            sources.push(source.to_string());
            next = source.source();
        }
        Self {
            message: error.to_string(),
            sources,
        }
    }

    /// Build from a bare message (no source chain).
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sources: Vec::new(),
        }
    }
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for source in &self.sources {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

/// A single captured log entry.
///
/// Records are immutable once created and are kept in arrival order
/// by the logger that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub event_id: EventId,
    /// Structured key-value state supplied with the entry.
    pub state: Vec<(String, Value)>,
    pub error: Option<LogError>,
    /// Message rendered by the formatter.
    pub message: String,
    pub category: String,
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    /// Look up a structured state value by key.
    #[must_use]
    pub fn state_value(&self, key: &str) -> Option<&Value> {
        self.state.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("outer failure")]
    struct Outer(#[source] Inner);

    #[derive(Debug, thiserror::Error)]
    #[error("inner failure")]
    struct Inner;

    #[test]
    fn tracing_levels_map_onto_log_levels() {
        assert_eq!(LogLevel::from(tracing::Level::INFO), LogLevel::Information);
        assert_eq!(LogLevel::from(tracing::Level::WARN), LogLevel::Warning);
        assert!(LogLevel::Critical > LogLevel::Error);
    }

    #[test]
    fn log_error_keeps_source_chain() {
        let err = LogError::capture(&Outer(Inner));
        assert_eq!(err.message, "outer failure");
        assert_eq!(err.sources, vec!["inner failure".to_string()]);
        assert_eq!(err.to_string(), "outer failure: inner failure");
    }
}
