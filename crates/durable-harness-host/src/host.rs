//! Job host lifecycle and trigger invocation.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use durable_harness_core::{
    CaptureLayer, DurabilityProvider, NameResolver, ServiceCollection, ServiceProvider,
    TestLoggerProvider,
};
use durable_harness_messages::{
    BindingValue, DefaultSerializerSettingsFactory, FunctionArguments,
    MessageSerializerSettingsFactory,
};
use serde_json::Value;
use tokio::{
    sync::{Semaphore, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{Dispatch, instrument::WithSubscriber};
use tracing_subscriber::layer::SubscriberExt;
use uuid::Uuid;

use crate::{
    BindingError, DefaultHttpHandlerFactory, FunctionRef, HostError, HttpHandlerFactory,
    InvocationContext, LocalOrchestrationService, TypeLocator,
    dispatcher::{self, Runtime, WorkItem, run_guarded},
    function::{FunctionKind, FunctionRegistry, Parameter, ParameterKind},
};

/// Host-level knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSettings {
    pub hub_name: String,
    /// How long `stop` waits for in-flight orchestrations.
    pub shutdown_timeout: Duration,
    pub max_concurrent_orchestrator_functions: usize,
    pub max_concurrent_activity_functions: usize,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            hub_name: "TestHubV2".to_string(),
            shutdown_timeout: Duration::from_secs(5),
            max_concurrent_orchestrator_functions: 200,
            max_concurrent_activity_functions: 200,
        }
    }
}

/// Everything a host needs to be built.
pub struct HostConfiguration {
    /// Backend for every log the host and its functions write.
    pub logger_provider: Arc<TestLoggerProvider>,
    /// The only function set types the host indexes.
    pub type_locator: TypeLocator,
    pub name_resolver: Arc<dyn NameResolver>,
    pub services: ServiceCollection,
    pub settings: HostSettings,
}

impl fmt::Debug for HostConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostConfiguration")
            .field("type_locator", &self.type_locator)
            .field("services", &self.services.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// An embedded host that runs function code.
#[async_trait]
pub trait JobHost: Send + Sync {
    /// Index functions and begin dispatching orchestrations.
    async fn start(&self) -> Result<(), HostError>;

    /// Stop dispatching and wait for in-flight work.
    ///
    /// # Errors
    /// Returns [`HostError::ShutdownCanceled`] if in-flight work had to be
    /// abandoned.
    async fn stop(&self) -> Result<(), HostError>;

    /// Abandon all work without waiting.
    fn shutdown_now(&self);

    /// Invoke a trigger function with caller-supplied arguments.
    async fn call(
        &self,
        function: &FunctionRef,
        arguments: FunctionArguments,
    ) -> Result<Value, HostError>;

    fn services(&self) -> &ServiceProvider;

    fn durability_provider(&self) -> Arc<dyn DurabilityProvider>;
}

/// Builds job hosts.
pub trait HostFactory: Send + Sync {
    /// # Errors
    /// Returns error if the configuration cannot produce a host.
    fn build(&self, configuration: HostConfiguration) -> Result<Box<dyn JobHost>, HostError>;
}

/// Builds [`FunctionHost`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct InProcessHostFactory;

impl HostFactory for InProcessHostFactory {
    fn build(&self, configuration: HostConfiguration) -> Result<Box<dyn JobHost>, HostError> {
        Ok(Box::new(FunctionHost::new(configuration)))
    }
}

enum Lifecycle {
    Created,
    Running {
        runtime: Arc<Runtime>,
        shutdown: oneshot::Sender<()>,
        dispatcher: JoinHandle<()>,
    },
    Stopped,
}

/// Job host that runs functions in-process against a
/// [`LocalOrchestrationService`].
///
/// Every event the host and its functions emit through `tracing` is
/// captured into the configured [`TestLoggerProvider`], with the event
/// target as category.
pub struct FunctionHost {
    settings: HostSettings,
    logger_provider: Arc<TestLoggerProvider>,
    type_locator: TypeLocator,
    name_resolver: Arc<dyn NameResolver>,
    services: ServiceProvider,
    provider: Arc<LocalOrchestrationService>,
    dispatch: Dispatch,
    lifecycle: Mutex<Lifecycle>,
}

impl fmt::Debug for FunctionHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionHost")
            .field("settings", &self.settings)
            .field("type_locator", &self.type_locator)
            .finish_non_exhaustive()
    }
}

impl FunctionHost {
    #[must_use]
    pub fn new(configuration: HostConfiguration) -> Self {
        let HostConfiguration {
            logger_provider,
            type_locator,
            name_resolver,
            mut services,
            settings,
        } = configuration;

        services.try_add_singleton(Arc::clone(&logger_provider));
        let dispatch = Dispatch::new(
            tracing_subscriber::registry().with(CaptureLayer::new(Arc::clone(&logger_provider))),
        );

        Self {
            provider: Arc::new(LocalOrchestrationService::new(settings.hub_name.clone())),
            settings,
            logger_provider,
            type_locator,
            name_resolver,
            services: services.build(),
            dispatch,
            lifecycle: Mutex::new(Lifecycle::Created),
        }
    }

    /// The in-memory provider backing this host.
    #[must_use]
    pub const fn orchestration_service(&self) -> &Arc<LocalOrchestrationService> {
        &self.provider
    }

    fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }

    fn runtime(&self) -> Result<Arc<Runtime>, HostError> {
        match &*self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner) {
            Lifecycle::Running { runtime, .. } => Ok(Arc::clone(runtime)),
            Lifecycle::Created | Lifecycle::Stopped => Err(HostError::NotStarted),
        }
    }

    fn build_runtime(
        &self,
    ) -> Result<(Arc<Runtime>, mpsc::UnboundedReceiver<WorkItem>), HostError> {
        let registry = FunctionRegistry::index(
            &self.type_locator,
            &self.services,
            self.name_resolver.as_ref(),
            &self.logger_provider,
        )?;

        let functions: Vec<String> = registry
            .names()
            .iter()
            .filter_map(|name| registry.describe(name))
            .collect();
        tracing::info!(
            target: "Host.Startup",
            count = functions.len(),
            "Found the following functions:\n{}",
            functions.join("\n")
        );

        let http = self
            .services
            .get_service::<dyn HttpHandlerFactory>()
            .unwrap_or_else(|| Arc::new(DefaultHttpHandlerFactory::new()));
        let serializer = self
            .services
            .get_service::<dyn MessageSerializerSettingsFactory>()
            .map_or_else(
                || DefaultSerializerSettingsFactory.create_serializer_settings(),
                |factory| factory.create_serializer_settings(),
            );

        let (work, receiver) = mpsc::unbounded_channel();
        let runtime = Arc::new(Runtime {
            registry,
            provider: Arc::clone(&self.provider),
            services: self.services.clone(),
            serializer,
            http,
            orchestrator_slots: Arc::new(Semaphore::new(
                self.settings.max_concurrent_orchestrator_functions.max(1),
            )),
            activity_slots: Semaphore::new(self.settings.max_concurrent_activity_functions.max(1)),
            work,
            dispatch: self.dispatch.clone(),
        });
        Ok((runtime, receiver))
    }
}

/// Check caller arguments against a trigger's declared parameters.
fn bind(
    function: &str,
    parameters: &[Parameter],
    arguments: &FunctionArguments,
) -> Result<(), BindingError> {
    for (name, value) in arguments {
        let parameter = parameters
            .iter()
            .find(|p| &p.name == name && p.kind.is_caller_bound())
            .ok_or_else(|| BindingError::UnknownArgument {
                function: function.to_string(),
                argument: name.clone(),
            })?;

        let matches = matches!(
            (parameter.kind, value),
            (ParameterKind::HttpRequest, BindingValue::Http(_))
                | (ParameterKind::Message, BindingValue::Message(_))
                | (ParameterKind::Json, BindingValue::Json(_))
        );
        if !matches {
            return Err(BindingError::TypeMismatch {
                function: function.to_string(),
                parameter: name.clone(),
                expected: parameter.kind.as_str(),
                actual: value.kind(),
            });
        }
    }

    if let Some(missing) = parameters
        .iter()
        .find(|p| p.kind.is_caller_bound() && arguments.get(&p.name).is_none())
    {
        return Err(BindingError::MissingArgument {
            function: function.to_string(),
            parameter: missing.name.clone(),
        });
    }
    Ok(())
}

#[async_trait]
impl JobHost for FunctionHost {
    async fn start(&self) -> Result<(), HostError> {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*lifecycle, Lifecycle::Created) {
            return Err(HostError::AlreadyStarted);
        }

        let (runtime, receiver) = self.in_scope(|| {
            tracing::info!(
                target: "Host.Startup",
                hub_name = %self.settings.hub_name,
                "Starting JobHost"
            );
            self.build_runtime()
        })?;

        let (shutdown, shutdown_rx) = oneshot::channel();
        let dispatcher = tokio::spawn(
            dispatcher::run(Arc::clone(&runtime), receiver, shutdown_rx)
                .with_subscriber(self.dispatch.clone()),
        );
        *lifecycle = Lifecycle::Running {
            runtime,
            shutdown,
            dispatcher,
        };
        drop(lifecycle);

        self.in_scope(|| tracing::info!(target: "Host.Startup", "Job host started"));
        Ok(())
    }

    async fn stop(&self) -> Result<(), HostError> {
        let previous = std::mem::replace(
            &mut *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner),
            Lifecycle::Stopped,
        );
        let Lifecycle::Running {
            shutdown,
            mut dispatcher,
            ..
        } = previous
        else {
            return Ok(());
        };

        self.in_scope(|| tracing::info!(target: "Host.General", "Stopping JobHost"));
        let _ = shutdown.send(());

        let timeout = self.settings.shutdown_timeout;
        if tokio::time::timeout(timeout, &mut dispatcher).await.is_err() {
            dispatcher.abort();
            self.in_scope(|| {
                tracing::warn!(
                    target: "Host.General",
                    "Job host shutdown timed out after {timeout:?}; in-flight orchestrations were canceled"
                );
            });
            return Err(HostError::ShutdownCanceled(timeout));
        }

        self.in_scope(|| tracing::info!(target: "Host.General", "Job host stopped"));
        Ok(())
    }

    fn shutdown_now(&self) {
        let previous = std::mem::replace(
            &mut *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner),
            Lifecycle::Stopped,
        );
        if let Lifecycle::Running {
            shutdown,
            dispatcher,
            ..
        } = previous
        {
            let _ = shutdown.send(());
            dispatcher.abort();
            self.in_scope(|| tracing::info!(target: "Host.General", "Job host shut down"));
        }
    }

    async fn call(
        &self,
        function: &FunctionRef,
        arguments: FunctionArguments,
    ) -> Result<Value, HostError> {
        let runtime = self.runtime()?;
        let name = function.name();
        let indexed = runtime
            .registry
            .get(name)
            .filter(|f| f.declared_by == function.type_id())
            .ok_or_else(|| HostError::FunctionNotIndexed(function.to_string()))?;

        let FunctionKind::Trigger {
            trigger,
            parameters,
            handler,
        } = &indexed.kind
        else {
            return Err(HostError::NotInvocable(name.to_string()));
        };
        bind(name, parameters, &arguments)?;

        let invocation_id = Uuid::new_v4();
        let host_logger = Arc::clone(&indexed.host_logger);
        let handler = Arc::clone(handler);
        host_logger.information(format!(
            "Executing 'Functions.{name}' (Reason='{}', Id={invocation_id})",
            trigger.reason()
        ));

        let ctx = InvocationContext::new(
            invocation_id,
            name.to_string(),
            arguments,
            parameters.clone(),
            Arc::clone(&indexed.user_logger),
            Arc::clone(&runtime),
        );
        let started = Instant::now();
        let result = run_guarded(&*handler, ctx)
            .with_subscriber(self.dispatch.clone())
            .await;
        let elapsed = started.elapsed().as_millis();

        match result {
            Ok(value) => {
                host_logger.information(format!(
                    "Executed 'Functions.{name}' (Succeeded, Id={invocation_id}, Duration={elapsed}ms)"
                ));
                Ok(value)
            }
            Err(e) => {
                let message = format!("{e:#}");
                host_logger.error(format!(
                    "Executed 'Functions.{name}' (Failed, Id={invocation_id}, Duration={elapsed}ms)"
                ));
                Err(HostError::FunctionFailed {
                    name: name.to_string(),
                    message,
                })
            }
        }
    }

    fn services(&self) -> &ServiceProvider {
        &self.services
    }

    fn durability_provider(&self) -> Arc<dyn DurabilityProvider> {
        Arc::clone(&self.provider) as Arc<dyn DurabilityProvider>
    }
}

impl Drop for FunctionHost {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Lifecycle::Running { dispatcher, .. } = lifecycle {
            dispatcher.abort();
        }
    }
}
