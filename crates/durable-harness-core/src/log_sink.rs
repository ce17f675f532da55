//! Per-category log capture with history and live broadcast.

use std::{
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use chrono::{SecondsFormat, Utc};
use futures::{StreamExt, future};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{EventId, LogError, LogLevel, LogRecord, TestOutput};

/// Predicate deciding whether an entry for `(category, level)` is captured.
pub type LogFilter = Arc<dyn Fn(&str, LogLevel) -> bool + Send + Sync>;

/// Live broadcast capacity shared by all loggers of a provider.
const BROADCAST_CAPACITY: usize = 10_000;

/// Logger bound to a single category.
///
/// Appends are safe from any thread; the host logs from worker tasks
/// while the test thread reads.
pub struct TestLogger {
    category: String,
    filter: Option<LogFilter>,
    output: Option<Arc<dyn TestOutput>>,
    records: RwLock<Vec<LogRecord>>,
    sender: broadcast::Sender<LogRecord>,
}

impl std::fmt::Debug for TestLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestLogger")
            .field("category", &self.category)
            .field("records", &self.len())
            .finish_non_exhaustive()
    }
}

impl TestLogger {
    /// Category this logger was created for.
    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Whether entries at `level` pass the filter.
    #[must_use]
    pub fn is_enabled(&self, level: LogLevel) -> bool {
        self.filter
            .as_ref()
            .is_none_or(|filter| filter(&self.category, level))
    }

    /// Record an entry, rendering its message with `formatter`.
    ///
    /// Does nothing when the filter rejects `level`. The formatted line is
    /// also echoed to the test output; a closed output is ignored and the
    /// record is kept.
    pub fn log<F>(
        &self,
        level: LogLevel,
        event_id: EventId,
        state: Vec<(String, Value)>,
        error: Option<&(dyn std::error::Error + 'static)>,
        formatter: F,
    ) where
        F: FnOnce(&[(String, Value)], Option<&(dyn std::error::Error + 'static)>) -> String,
    {
        if !self.is_enabled(level) {
            return;
        }
        let message = formatter(&state, error);
        self.append(level, event_id, state, error.map(LogError::capture), message);
    }

    /// Record an entry whose message and error are already rendered.
    pub(crate) fn append(
        &self,
        level: LogLevel,
        event_id: EventId,
        state: Vec<(String, Value)>,
        error: Option<LogError>,
        message: String,
    ) {
        if !self.is_enabled(level) {
            return;
        }

        let record = LogRecord {
            level,
            event_id,
            state,
            error,
            message,
            category: self.category.clone(),
            timestamp: Utc::now(),
        };

        let line = format!(
            "    {}: {}",
            record.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            record.message
        );

        let _ = self.sender.send(record.clone()); // live listeners
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);

        if let Some(output) = &self.output {
            // Output goes away during teardown; the record above is still kept.
            let _ = output.write_line(&line);
        }
    }

    fn emit(&self, level: LogLevel, message: String) {
        self.append(level, EventId::default(), Vec::new(), None, message);
    }

    /// Record a trace-level entry.
    pub fn trace(&self, message: impl Into<String>) {
        self.emit(LogLevel::Trace, message.into());
    }

    /// Record a debug-level entry.
    pub fn debug(&self, message: impl Into<String>) {
        self.emit(LogLevel::Debug, message.into());
    }

    /// Record a information-level entry.
    pub fn information(&self, message: impl Into<String>) {
        self.emit(LogLevel::Information, message.into());
    }

    /// Record a warning-level entry.
    pub fn warning(&self, message: impl Into<String>) {
        self.emit(LogLevel::Warning, message.into());
    }

    /// Record a error-level entry.
    pub fn error(&self, message: impl Into<String>) {
        self.emit(LogLevel::Error, message.into());
    }

    /// Record a critical-level entry.
    pub fn critical(&self, message: impl Into<String>) {
        self.emit(LogLevel::Critical, message.into());
    }

    /// Record an error-level entry carrying `error`.
    pub fn error_with(&self, error: &(dyn std::error::Error + 'static), message: impl Into<String>) {
        let message = message.into();
        self.log(LogLevel::Error, EventId::default(), Vec::new(), Some(error), |_, _| message);
    }

    /// Snapshot of the captured records in arrival order.
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `(level, message)` pairs in arrival order.
    #[must_use]
    pub fn messages(&self) -> Vec<(LogLevel, String)> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| (r.level, r.message.clone()))
            .collect()
    }

    /// Number of captured records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been captured yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Creates [`TestLogger`]s and keeps every one of them for later inspection.
///
/// The registry holds one entry per created logger, not per category:
/// asking twice for the same category yields two independent loggers.
pub struct TestLoggerProvider {
    output: Option<Arc<dyn TestOutput>>,
    filter: Option<LogFilter>,
    loggers: RwLock<Vec<Arc<TestLogger>>>,
    sender: broadcast::Sender<LogRecord>,
}

impl Default for TestLoggerProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TestLoggerProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestLoggerProvider")
            .field("loggers", &self.created_loggers().len())
            .field("echo", &self.output.is_some())
            .finish_non_exhaustive()
    }
}

impl TestLoggerProvider {
    /// Create a provider that captures everything and echoes nowhere.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            output: None,
            filter: None,
            loggers: RwLock::new(Vec::new()),
            sender,
        }
    }

    /// Echo captured lines to `output`.
    #[must_use]
    pub fn with_output(mut self, output: Arc<dyn TestOutput>) -> Self {
        self.output = Some(output);
        self
    }

    /// Only capture entries accepted by `filter`.
    #[must_use]
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str, LogLevel) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Create and register a new logger for `category`.
    pub fn create_logger(&self, category: impl Into<String>) -> Arc<TestLogger> {
        let logger = Arc::new(TestLogger {
            category: category.into(),
            filter: self.filter.clone(),
            output: self.output.clone(),
            records: RwLock::new(Vec::new()),
            sender: self.sender.clone(),
        });
        self.loggers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&logger));
        logger
    }

    /// All loggers in creation order.
    #[must_use]
    pub fn created_loggers(&self) -> Vec<Arc<TestLogger>> {
        self.loggers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every record, logger by logger in creation order.
    ///
    /// Records keep their per-logger order; there is no global re-sort,
    /// so interleaving across loggers is not preserved.
    #[must_use]
    pub fn all_messages(&self) -> Vec<LogRecord> {
        self.created_loggers()
            .iter()
            .flat_map(|logger| logger.records())
            .collect()
    }

    /// The single logger for `category`.
    ///
    /// Returns `None` when no logger or more than one logger has that category.
    #[must_use]
    pub fn logger_by_category(&self, category: &str) -> Option<Arc<TestLogger>> {
        let mut matches = self.loggers_by_category(category).into_iter();
        match (matches.next(), matches.next()) {
            (Some(logger), None) => Some(logger),
            _ => None,
        }
    }

    /// Every logger created for `category`.
    #[must_use]
    pub fn loggers_by_category(&self, category: &str) -> Vec<Arc<TestLogger>> {
        self.loggers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|logger| logger.category == category)
            .cloned()
            .collect()
    }

    /// Records of every logger for `category`, merged logger by logger.
    #[must_use]
    pub fn messages_for_category(&self, category: &str) -> Vec<LogRecord> {
        self.loggers_by_category(category)
            .iter()
            .flat_map(|logger| logger.records())
            .collect()
    }

    /// Receiver for records captured from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.sender.subscribe()
    }

    /// Stream that yields the captured history first, then live records.
    #[must_use]
    pub fn record_stream(&self) -> futures::stream::BoxStream<'static, LogRecord> {
        let rx = self.subscribe();
        let history = self.all_messages();

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }

    /// Wait until a record matching `predicate` has been captured.
    ///
    /// Returns `None` if none shows up within `timeout`.
    pub async fn wait_for_message<P>(&self, predicate: P, timeout: Duration) -> Option<LogRecord>
    where
        P: Fn(&LogRecord) -> bool,
    {
        let matching = self
            .record_stream()
            .filter(|record| future::ready(predicate(record)));
        tokio::pin!(matching);
        tokio::time::timeout(timeout, matching.next())
            .await
            .ok()
            .flatten()
    }
}
