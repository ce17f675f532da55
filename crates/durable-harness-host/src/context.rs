//! Contexts handed to trigger, orchestrator and activity functions.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use durable_harness_core::{OrchestrationInstance, ServiceProvider, TestLogger};
use durable_harness_messages::{
    BindingValue, FunctionArguments, HttpRequest, HttpResponse, QueueMessage,
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use crate::{
    BindingError, DurableClient, OrchestrationError, ParameterKind,
    dispatcher::{Runtime, run_guarded},
    function::Parameter,
    provider::HistoryEventKind,
};

/// Context of a single trigger invocation.
pub struct InvocationContext {
    invocation_id: Uuid,
    function_name: String,
    arguments: FunctionArguments,
    parameters: Vec<Parameter>,
    logger: Arc<TestLogger>,
    runtime: Arc<Runtime>,
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("invocation_id", &self.invocation_id)
            .field("function_name", &self.function_name)
            .field("arguments", &self.arguments.names().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl InvocationContext {
    pub(crate) const fn new(
        invocation_id: Uuid,
        function_name: String,
        arguments: FunctionArguments,
        parameters: Vec<Parameter>,
        logger: Arc<TestLogger>,
        runtime: Arc<Runtime>,
    ) -> Self {
        Self {
            invocation_id,
            function_name,
            arguments,
            parameters,
            logger,
            runtime,
        }
    }

    #[must_use]
    pub const fn invocation_id(&self) -> Uuid {
        self.invocation_id
    }

    #[must_use]
    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// The `Function.<name>.User` logger.
    #[must_use]
    pub const fn logger(&self) -> &Arc<TestLogger> {
        &self.logger
    }

    #[must_use]
    pub fn services(&self) -> &ServiceProvider {
        &self.runtime.services
    }

    fn argument(&self, name: &str) -> Result<&BindingValue, BindingError> {
        self.arguments
            .get(name)
            .ok_or_else(|| BindingError::MissingArgument {
                function: self.function_name.clone(),
                parameter: name.to_string(),
            })
    }

    fn mismatch(&self, name: &str, expected: ParameterKind, actual: &BindingValue) -> BindingError {
        BindingError::TypeMismatch {
            function: self.function_name.clone(),
            parameter: name.to_string(),
            expected: expected.as_str(),
            actual: actual.kind(),
        }
    }

    /// The HTTP request bound to `name`.
    ///
    /// # Errors
    /// Returns error if `name` is unbound or not a request.
    pub fn http_request(&self, name: &str) -> Result<&HttpRequest, BindingError> {
        match self.argument(name)? {
            BindingValue::Http(request) => Ok(request),
            other => Err(self.mismatch(name, ParameterKind::HttpRequest, other)),
        }
    }

    /// The queue message bound to `name`.
    ///
    /// # Errors
    /// Returns error if `name` is unbound or not a message.
    pub fn message(&self, name: &str) -> Result<&QueueMessage, BindingError> {
        match self.argument(name)? {
            BindingValue::Message(message) => Ok(message),
            other => Err(self.mismatch(name, ParameterKind::Message, other)),
        }
    }

    /// The JSON value bound to `name`.
    ///
    /// # Errors
    /// Returns error if `name` is unbound or not JSON.
    pub fn json(&self, name: &str) -> Result<&Value, BindingError> {
        match self.argument(name)? {
            BindingValue::Json(value) => Ok(value),
            other => Err(self.mismatch(name, ParameterKind::Json, other)),
        }
    }

    /// The durable client injected for parameter `name`.
    ///
    /// # Errors
    /// Returns error if the function declares no such client parameter.
    pub fn durable_client(&self, name: &str) -> Result<DurableClient, BindingError> {
        if self
            .parameters
            .iter()
            .any(|p| p.name == name && p.kind == ParameterKind::DurableClient)
        {
            Ok(DurableClient::new(Arc::clone(&self.runtime)))
        } else {
            Err(BindingError::MissingArgument {
                function: self.function_name.clone(),
                parameter: name.to_string(),
            })
        }
    }
}

/// Retry policy for activity calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOptions {
    pub first_retry_interval: Duration,
    /// Total attempts, including the first.
    pub max_number_of_attempts: u32,
    pub backoff_coefficient: f64,
    pub max_retry_interval: Duration,
}

impl RetryOptions {
    #[must_use]
    pub const fn new(first_retry_interval: Duration, max_number_of_attempts: u32) -> Self {
        Self {
            first_retry_interval,
            max_number_of_attempts,
            backoff_coefficient: 1.0,
            max_retry_interval: Duration::from_secs(6 * 24 * 60 * 60),
        }
    }

    #[must_use]
    pub const fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    #[must_use]
    pub const fn with_max_retry_interval(mut self, interval: Duration) -> Self {
        self.max_retry_interval = interval;
        self
    }

    /// Delay before retry number `retry` (1 for the first retry).
    #[must_use]
    pub fn delay_before(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.backoff_coefficient.max(1.0).powi(exponent);
        let cap = self.max_retry_interval.as_secs_f64();
        let secs = (self.first_retry_interval.as_secs_f64() * factor).min(cap);
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_retry_interval)
    }
}

/// Context of one orchestration execution.
///
/// Calls run directly; there is no replay.
#[derive(Clone)]
pub struct OrchestrationContext {
    runtime: Arc<Runtime>,
    instance: OrchestrationInstance,
    name: String,
    input: Option<Value>,
    logger: Arc<TestLogger>,
}

impl std::fmt::Debug for OrchestrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationContext")
            .field("instance", &self.instance)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl OrchestrationContext {
    pub(crate) const fn new(
        runtime: Arc<Runtime>,
        instance: OrchestrationInstance,
        name: String,
        input: Option<Value>,
        logger: Arc<TestLogger>,
    ) -> Self {
        Self {
            runtime,
            instance,
            name,
            input,
            logger,
        }
    }

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance.instance_id
    }

    #[must_use]
    pub fn execution_id(&self) -> &str {
        &self.instance.execution_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn logger(&self) -> &Arc<TestLogger> {
        &self.logger
    }

    #[must_use]
    pub fn services(&self) -> &ServiceProvider {
        &self.runtime.services
    }

    #[must_use]
    pub fn current_utc_date_time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// The orchestration input; a missing input reads as `null`.
    ///
    /// # Errors
    /// Returns error if the input does not match `T`.
    pub fn input<T: DeserializeOwned>(&self) -> Result<T, OrchestrationError> {
        let input = self.input.clone().unwrap_or(Value::Null);
        Ok(self.runtime.serializer.from_value(input)?)
    }

    fn record(&self, kind: HistoryEventKind) -> Result<i32, OrchestrationError> {
        Ok(self.runtime.provider.append_event(&self.instance, kind)?)
    }

    /// Run activity `name` once and return its result.
    ///
    /// # Errors
    /// Returns [`OrchestrationError::ActivityFailed`] if the activity fails
    /// or panics.
    pub async fn call_activity<T, I>(&self, name: &str, input: &I) -> Result<T, OrchestrationError>
    where
        T: DeserializeOwned,
        I: Serialize + ?Sized,
    {
        let (handler, logger) = self
            .runtime
            .registry
            .activity(name)
            .ok_or_else(|| OrchestrationError::UnknownActivity(name.to_string()))?;

        let input = self.runtime.serializer.to_value(input)?;
        let scheduled = self.record(HistoryEventKind::TaskScheduled {
            name: name.to_string(),
            input: Some(input.clone()),
        })?;

        let result = {
            let _permit = self
                .runtime
                .activity_slots
                .acquire()
                .await
                .map_err(|_| OrchestrationError::HostStopped)?;
            let ctx = ActivityContext {
                instance: self.instance.clone(),
                name: name.to_string(),
                input,
                logger,
                runtime: Arc::clone(&self.runtime),
            };
            run_guarded(&*handler, ctx).await
        };

        match result {
            Ok(value) => {
                self.record(HistoryEventKind::TaskCompleted {
                    scheduled_event_id: scheduled,
                    result: value.clone(),
                })?;
                Ok(self.runtime.serializer.from_value(value)?)
            }
            Err(e) => {
                let message = format!("{e:#}");
                self.record(HistoryEventKind::TaskFailed {
                    scheduled_event_id: scheduled,
                    reason: message.clone(),
                })?;
                Err(OrchestrationError::ActivityFailed {
                    name: name.to_string(),
                    message,
                })
            }
        }
    }

    /// Run activity `name`, retrying failures according to `retry`.
    ///
    /// # Errors
    /// Returns the last failure once all attempts are used.
    pub async fn call_activity_with_retry<T, I>(
        &self,
        name: &str,
        retry: &RetryOptions,
        input: &I,
    ) -> Result<T, OrchestrationError>
    where
        T: DeserializeOwned,
        I: Serialize + ?Sized,
    {
        let attempts = retry.max_number_of_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.call_activity(name, input).await {
                Err(OrchestrationError::ActivityFailed { message, .. }) if attempt < attempts => {
                    tracing::debug!(
                        target: "Host.Dispatcher",
                        instance_id = %self.instance.instance_id,
                        attempt,
                        "Activity '{name}' failed, retrying: {message}"
                    );
                    self.create_timer(retry.delay_before(attempt)).await?;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Send `request` through the host's HTTP handler.
    ///
    /// # Errors
    /// Returns error if the response body cannot be read.
    pub async fn call_http(&self, request: HttpRequest) -> Result<HttpResponse, OrchestrationError> {
        let scheduled = self.record(HistoryEventKind::HttpRequestSent {
            method: request.method().to_string(),
            uri: request.uri().to_string(),
        })?;

        let handler = self.runtime.http.create_http_handler();
        let response = match handler.oneshot(request.into_request()).await {
            Ok(response) => response,
            Err(never) => match never {},
        };
        let response = HttpResponse::from_response(response).await?;

        self.record(HistoryEventKind::HttpResponseReceived {
            scheduled_event_id: scheduled,
            status: response.status.as_u16(),
        })?;
        Ok(response)
    }

    /// Wait for `delay` and record the timer in history.
    ///
    /// # Errors
    /// Returns error if the execution is no longer known.
    pub async fn create_timer(&self, delay: Duration) -> Result<(), OrchestrationError> {
        let fire_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let timer_id = self.record(HistoryEventKind::TimerCreated { fire_at })?;
        tokio::time::sleep(delay).await;
        self.record(HistoryEventKind::TimerFired { timer_id })?;
        Ok(())
    }
}

/// Context of one activity call.
pub struct ActivityContext {
    instance: OrchestrationInstance,
    name: String,
    input: Value,
    logger: Arc<TestLogger>,
    runtime: Arc<Runtime>,
}

impl std::fmt::Debug for ActivityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityContext")
            .field("instance", &self.instance)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ActivityContext {
    /// Instance id of the calling orchestration.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance.instance_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn raw_input(&self) -> &Value {
        &self.input
    }

    /// The activity input.
    ///
    /// # Errors
    /// Returns error if the input does not match `T`.
    pub fn input<T: DeserializeOwned>(&self) -> Result<T, OrchestrationError> {
        Ok(self.runtime.serializer.from_value(self.input.clone())?)
    }

    #[must_use]
    pub const fn logger(&self) -> &Arc<TestLogger> {
        &self.logger
    }

    #[must_use]
    pub fn services(&self) -> &ServiceProvider {
        &self.runtime.services
    }
}
