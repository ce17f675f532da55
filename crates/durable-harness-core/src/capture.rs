//! Bridge from `tracing` events into the log capture.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use serde_json::Value;
use tracing::{
    Event, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{Layer, layer::Context};

use crate::{EventId, LogError, LogLevel, TestLogger, TestLoggerProvider};

/// `tracing` layer that records every event into a [`TestLoggerProvider`].
///
/// The event target becomes the log category. One logger is created per
/// target the first time it is seen and reused afterwards, so lookups by
/// category stay unambiguous.
pub struct CaptureLayer {
    provider: Arc<TestLoggerProvider>,
    loggers: RwLock<HashMap<String, Arc<TestLogger>>>,
}

impl CaptureLayer {
    #[must_use]
    pub fn new(provider: Arc<TestLoggerProvider>) -> Self {
        Self {
            provider,
            loggers: RwLock::new(HashMap::new()),
        }
    }

    fn logger_for(&self, target: &str) -> Arc<TestLogger> {
        if let Some(logger) = self
            .loggers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
        {
            return Arc::clone(logger);
        }

        let mut loggers = self.loggers.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            loggers
                .entry(target.to_string())
                .or_insert_with(|| self.provider.create_logger(target)),
        )
    }
}

#[derive(Default)]
struct EventVisitor {
    message: Option<String>,
    error: Option<LogError>,
    event_id: Option<i32>,
    state: Vec<(String, Value)>,
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            name => self.state.push((name.to_string(), Value::from(value))),
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if field.name() == "event_id" {
            self.event_id = i32::try_from(value).ok();
        }
        self.state.push((field.name().to_string(), Value::from(value)));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "event_id" {
            self.event_id = i32::try_from(value).ok();
        }
        self.state.push((field.name().to_string(), Value::from(value)));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.state.push((field.name().to_string(), Value::from(value)));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.state.push((field.name().to_string(), Value::from(value)));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        let captured = LogError::capture(value);
        self.state
            .push((field.name().to_string(), Value::from(captured.to_string())));
        self.error = Some(captured);
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = Some(format!("{value:?}")),
            "error" => {
                let text = format!("{value:?}");
                self.error = Some(LogError::from_message(text.clone()));
                self.state.push(("error".to_string(), Value::from(text)));
            }
            name => self
                .state
                .push((name.to_string(), Value::from(format!("{value:?}")))),
        }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = LogLevel::from(*metadata.level());
        let logger = self.logger_for(metadata.target());
        if !logger.is_enabled(level) {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let event_id = visitor.event_id.map_or_else(EventId::default, EventId::new);
        let message = visitor.message.unwrap_or_default();
        logger.append(level, event_id, visitor.state, visitor.error, message);
    }
}
