//! Test job host wrapper: lifecycle, invocation and orchestration polling.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use durable_harness_core::{
    DurabilityProvider, NameResolver, OrchestrationQuery, OrchestrationState, ProviderError,
    ServiceCollection, ServiceProvider, TestLogger, TestLoggerProvider, TestNameResolver,
    TestOutput,
};
use durable_harness_host::{
    DefaultHttpHandlerFactory, FunctionRef, FunctionSet, HostConfiguration, HostError,
    HostFactory, HttpHandlerFactory, InProcessHostFactory, JobHost, TypeLocator,
};
use durable_harness_messages::{
    DefaultSerializerSettingsFactory, FunctionArguments, MessageSerializerSettingsFactory,
};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{
    HarnessError, OrchestrationTracking, STORAGE_SETTING, TestHostOptions, debugger,
};

/// Lifecycle of a [`TestJobHost`]. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    /// Built, never started.
    Unstarted,
    /// The job host is being constructed.
    Starting,
    /// Accepting invocations.
    Running,
    /// Shutdown in progress.
    Stopping,
    /// Host released; cannot be restarted.
    Stopped,
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unstarted => "Unstarted",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}

/// The started host and its provider.
#[derive(Clone)]
struct HostSession {
    host: Arc<dyn JobHost>,
    provider: Arc<dyn DurabilityProvider>,
}

struct Session {
    state: HostState,
    current: Option<HostSession>,
    last_state: Option<OrchestrationState>,
}

/// Builds a [`TestJobHost`].
pub struct TestJobHostBuilder {
    options: TestHostOptions,
    type_locator: TypeLocator,
    services: Option<ServiceCollection>,
    name_resolver: Option<Arc<dyn NameResolver>>,
    output: Option<Arc<dyn TestOutput>>,
    logger_provider: Option<Arc<TestLoggerProvider>>,
    factory: Arc<dyn HostFactory>,
}

impl TestJobHostBuilder {
    fn new() -> Self {
        Self {
            options: TestHostOptions::default(),
            type_locator: TypeLocator::new(),
            services: None,
            name_resolver: None,
            output: None,
            logger_provider: None,
            factory: Arc::new(InProcessHostFactory),
        }
    }

    /// Replace the default host options.
    #[must_use]
    pub fn options(mut self, options: TestHostOptions) -> Self {
        self.options = options;
        self
    }

    /// Index the functions declared by `T`.
    #[must_use]
    pub fn function_set<T: FunctionSet>(mut self) -> Self {
        self.type_locator = self.type_locator.with::<T>();
        self
    }

    /// Replace the indexed function set types wholesale.
    #[must_use]
    pub fn type_locator(mut self, type_locator: TypeLocator) -> Self {
        self.type_locator = type_locator;
        self
    }

    /// Services the function sets depend on. Must be non-empty for the
    /// host to start.
    #[must_use]
    pub fn services(mut self, services: ServiceCollection) -> Self {
        self.services = Some(services);
        self
    }

    /// Consulted after the app settings and before the environment.
    #[must_use]
    pub fn name_resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.name_resolver = Some(resolver);
        self
    }

    /// Echo every captured log line to `output`.
    #[must_use]
    pub fn output(mut self, output: Arc<dyn TestOutput>) -> Self {
        self.output = Some(output);
        self
    }

    /// Capture logs into an existing provider. Takes precedence over
    /// [`output`](Self::output).
    #[must_use]
    pub fn logger_provider(mut self, provider: Arc<TestLoggerProvider>) -> Self {
        self.logger_provider = Some(provider);
        self
    }

    /// Build the job host with `factory` instead of the in-process host.
    #[must_use]
    pub fn host_factory(mut self, factory: Arc<dyn HostFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Finish the builder. Nothing starts until the first `start` or `invoke`.
    #[must_use]
    pub fn build(self) -> TestJobHost {
        let loggers = self.logger_provider.unwrap_or_else(|| {
            let provider = TestLoggerProvider::new();
            Arc::new(match self.output {
                Some(output) => provider.with_output(output),
                None => provider,
            })
        });
        TestJobHost {
            options: self.options,
            loggers,
            type_locator: self.type_locator,
            services: self.services,
            name_resolver: self.name_resolver,
            factory: self.factory,
            session: RwLock::new(Session {
                state: HostState::Unstarted,
                current: None,
                last_state: None,
            }),
            disposed: AtomicBool::new(false),
        }
    }
}

/// Wraps an embedded job host for end-to-end tests of a function app.
///
/// ```ignore
/// let host = TestJobHost::builder()
///     .function_set::<SampleFunctions>()
///     .services(services)
///     .build();
/// host.invoke(&FunctionRef::of::<SampleFunctions>("HttpTriggerFunction"), args).await?;
/// let state = host.await_orchestration("1000").await?;
/// host.dispose().await?;
/// ```
pub struct TestJobHost {
    options: TestHostOptions,
    loggers: Arc<TestLoggerProvider>,
    type_locator: TypeLocator,
    services: Option<ServiceCollection>,
    name_resolver: Option<Arc<dyn NameResolver>>,
    factory: Arc<dyn HostFactory>,
    session: RwLock<Session>,
    disposed: AtomicBool,
}

impl fmt::Debug for TestJobHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestJobHost")
            .field("options", &self.options)
            .field("type_locator", &self.type_locator)
            .finish_non_exhaustive()
    }
}

impl TestJobHost {
    #[must_use]
    pub fn builder() -> TestJobHostBuilder {
        TestJobHostBuilder::new()
    }

    #[must_use]
    pub const fn options(&self) -> &TestHostOptions {
        &self.options
    }

    /// Every logger created during this run.
    #[must_use]
    pub const fn logger_provider(&self) -> &Arc<TestLoggerProvider> {
        &self.loggers
    }

    pub async fn state(&self) -> HostState {
        self.session.read().await.state
    }

    /// Build and start the embedded host.
    ///
    /// Calling `start` on a starting or running host does nothing.
    ///
    /// # Errors
    /// Returns [`HarnessError::Configuration`] when no services were
    /// supplied, [`HarnessError::Stopped`] after `stop`, or the host's
    /// error if it fails to start.
    pub async fn start(&self) -> Result<(), HarnessError> {
        let mut session = self.session.write().await;
        match session.state {
            HostState::Starting | HostState::Running => return Ok(()),
            HostState::Stopping | HostState::Stopped => return Err(HarnessError::Stopped),
            HostState::Unstarted => {}
        }

        let services = match &self.services {
            Some(services) if !services.is_empty() => services.clone(),
            _ => return Err(HarnessError::no_services()),
        };

        session.state = HostState::Starting;
        tracing::debug!(hub_name = %self.options.hub_name, "Starting test job host");

        match self.start_host(services).await {
            Ok(started) => {
                session.current = Some(started);
                session.state = HostState::Running;
                tracing::info!(hub_name = %self.options.hub_name, "Test job host started");
                Ok(())
            }
            Err(e) => {
                session.state = HostState::Stopped;
                tracing::warn!(error = %e, "Test job host failed to start");
                Err(e)
            }
        }
    }

    async fn start_host(&self, mut services: ServiceCollection) -> Result<HostSession, HarnessError> {
        let mut resolver = TestNameResolver::new()
            .with_setting(STORAGE_SETTING, self.options.storage_connection_string.clone())
            .with_settings(&self.options.app_settings);
        if let Some(inner) = &self.name_resolver {
            resolver = resolver.with_inner(Arc::clone(inner));
        }

        services
            .try_add_singleton::<dyn HttpHandlerFactory>(Arc::new(DefaultHttpHandlerFactory::new()))
            .try_add_singleton::<dyn MessageSerializerSettingsFactory>(Arc::new(
                DefaultSerializerSettingsFactory,
            ));

        let configuration = HostConfiguration {
            logger_provider: Arc::clone(&self.loggers),
            type_locator: self.type_locator.clone(),
            name_resolver: Arc::new(resolver),
            services,
            settings: self.options.host_settings(),
        };
        let host: Arc<dyn JobHost> = Arc::from(self.factory.build(configuration)?);

        if let Err(e) = host.start().await {
            host.shutdown_now();
            return Err(e.into());
        }
        let provider = host.durability_provider();
        Ok(HostSession { host, provider })
    }

    /// Stop and release the embedded host.
    ///
    /// Does nothing if the host never started or is already stopped. A
    /// shutdown that had to cancel in-flight work is not an error.
    ///
    /// # Errors
    /// Returns any other error reported by the host; the host is released
    /// either way.
    pub async fn stop(&self) -> Result<(), HarnessError> {
        let mut session = self.session.write().await;
        if matches!(session.state, HostState::Unstarted | HostState::Stopped) {
            return Ok(());
        }

        session.state = HostState::Stopping;
        let result = match session.current.take() {
            Some(HostSession { host, provider }) => {
                let result = host.stop().await;
                drop(provider);
                drop(host);
                result
            }
            None => Ok(()),
        };
        session.state = HostState::Stopped;
        drop(session);

        match result {
            Ok(()) => {
                tracing::info!(hub_name = %self.options.hub_name, "Test job host stopped");
                Ok(())
            }
            Err(HostError::ShutdownCanceled(timeout)) => {
                tracing::debug!(?timeout, "Ignoring canceled job host shutdown");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stop once. Later calls and `Drop` do nothing.
    ///
    /// # Errors
    /// Returns the error from [`stop`](Self::stop).
    pub async fn dispose(&self) -> Result<(), HarnessError> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stop().await
    }

    async fn running(&self) -> Result<HostSession, HarnessError> {
        let session = self.session.read().await;
        match (&session.state, &session.current) {
            (HostState::Running, Some(current)) => Ok(current.clone()),
            (HostState::Stopping | HostState::Stopped, _) => Err(HarnessError::Stopped),
            _ => Err(HarnessError::NotStarted),
        }
    }

    /// Call a trigger function with named arguments.
    ///
    /// The host is started first when it was never started and
    /// `auto_start` is set.
    ///
    /// # Errors
    /// Returns the host's error unchanged, including binding mismatches.
    pub async fn invoke(
        &self,
        function: &FunctionRef,
        arguments: FunctionArguments,
    ) -> Result<Value, HarnessError> {
        if self.options.auto_start && self.state().await == HostState::Unstarted {
            tracing::info!(function = %function, "Auto-starting test job host for first invocation");
            self.start().await?;
        }
        let HostSession { host, .. } = self.running().await?;
        Ok(host.call(function, arguments).await?)
    }

    /// Wait for the most recent execution of `instance_id` to finish.
    ///
    /// # Errors
    /// Returns [`HarnessError::OrchestrationNotFound`] at once when the id
    /// was never started, or [`HarnessError::Timeout`] when the execution
    /// is still running after the deadline.
    pub async fn await_orchestration(
        &self,
        instance_id: &str,
    ) -> Result<OrchestrationState, HarnessError> {
        let HostSession { provider, .. } = self.running().await?;
        let current = provider
            .get_orchestration_state(instance_id, false)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| HarnessError::OrchestrationNotFound(instance_id.to_string()))?;

        let timeout = self
            .options
            .effective_orchestration_timeout(debugger::is_attached());
        let state = match provider
            .wait_for_orchestration(instance_id, current.execution_id(), timeout)
            .await
        {
            Ok(state) => state,
            Err(ProviderError::Timeout { .. }) => {
                return Err(HarnessError::Timeout {
                    instance_id: instance_id.to_string(),
                    timeout,
                });
            }
            Err(e) => return Err(e.into()),
        };

        if self.options.tracking == OrchestrationTracking::TrackLast {
            self.session.write().await.last_state = Some(state.clone());
        }
        Ok(state)
    }

    /// Latest state of `instance_id` with its serialized history, or `None`
    /// if the orchestration has not been observed.
    ///
    /// # Errors
    /// Returns error if the host is not running or the provider fails.
    pub async fn orchestration_state_with_history(
        &self,
        instance_id: &str,
    ) -> Result<Option<(OrchestrationState, String)>, HarnessError> {
        let HostSession { provider, .. } = self.running().await?;
        let Some(state) = provider
            .get_orchestration_state(instance_id, false)
            .await?
            .into_iter()
            .next()
        else {
            return Ok(None);
        };
        let history = provider
            .get_orchestration_history(state.instance_id(), state.execution_id())
            .await?;
        Ok(Some((state, history)))
    }

    /// The state last returned by `await_orchestration`, with its history.
    ///
    /// # Errors
    /// Returns [`HarnessError::TrackingDisabled`] unless tracking is
    /// [`OrchestrationTracking::TrackLast`], and
    /// [`HarnessError::NoTrackedOrchestration`] before anything was awaited.
    pub async fn last_orchestration_state_with_history(
        &self,
    ) -> Result<(OrchestrationState, String), HarnessError> {
        if self.options.tracking != OrchestrationTracking::TrackLast {
            return Err(HarnessError::TrackingDisabled);
        }
        let state = self
            .session
            .read()
            .await
            .last_state
            .clone()
            .ok_or(HarnessError::NoTrackedOrchestration)?;

        let HostSession { provider, .. } = self.running().await?;
        let history = provider
            .get_orchestration_history(state.instance_id(), state.execution_id())
            .await?;
        Ok((state, history))
    }

    /// Every orchestration matching `query`, across all result pages.
    ///
    /// # Errors
    /// Returns error if the host is not running or the provider fails.
    pub async fn orchestration_states(
        &self,
        query: Option<OrchestrationQuery>,
    ) -> Result<Vec<OrchestrationState>, HarnessError> {
        let HostSession { provider, .. } = self.running().await?;
        let mut query = query.unwrap_or_default();
        let mut states = Vec::new();
        loop {
            let page = provider.query_orchestrations(&query).await?;
            states.extend(page.states);
            match page.continuation_token {
                Some(token) => query.continuation_token = Some(token),
                None => return Ok(states),
            }
        }
    }

    /// The single logger for `category`, or `None` if there are none or
    /// several.
    #[must_use]
    pub fn logger_by_category(&self, category: &str) -> Option<Arc<TestLogger>> {
        self.loggers.logger_by_category(category)
    }

    /// The user logger handed to function `name`.
    #[must_use]
    pub fn logger_by_function_name(&self, name: &str) -> Option<Arc<TestLogger>> {
        self.loggers
            .logger_by_category(&format!("Function.{name}.User"))
    }

    /// Resolve a service from the running host's container.
    ///
    /// # Errors
    /// Returns [`HarnessError::NotStarted`] before start and
    /// [`HarnessError::Service`] if `T` was never registered.
    pub async fn get_service<T>(&self) -> Result<Arc<T>, HarnessError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let HostSession { host, .. } = self.running().await?;
        Ok(host.services().get_required_service::<T>()?)
    }

    /// The running host's service provider.
    ///
    /// # Errors
    /// Returns error if the host is not running.
    pub async fn service_provider(&self) -> Result<ServiceProvider, HarnessError> {
        let HostSession { host, .. } = self.running().await?;
        Ok(host.services().clone())
    }
}

impl Drop for TestJobHost {
    fn drop(&mut self) {
        if *self.disposed.get_mut() {
            return;
        }
        let session = self.session.get_mut();
        if let Some(HostSession { host, .. }) = session.current.take() {
            tracing::debug!("Test job host dropped without dispose; shutting down");
            host.shutdown_now();
        }
        session.state = HostState::Stopped;
    }
}
