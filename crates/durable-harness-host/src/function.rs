//! Function model: definitions, function sets and the type locator.

use std::{
    any::{TypeId, type_name},
    collections::HashMap,
    fmt,
    future::Future,
    sync::Arc,
};

use durable_harness_core::{
    NameResolver, ResolveError, ServiceError, ServiceProvider, TestLogger, TestLoggerProvider,
};
use futures::{FutureExt, future::BoxFuture};
use serde_json::Value;

use crate::{ActivityContext, HostError, InvocationContext, OrchestrationContext};

/// Result of a user function body.
pub type FunctionResult = anyhow::Result<Value>;

pub type TriggerHandler =
    Arc<dyn Fn(InvocationContext) -> BoxFuture<'static, FunctionResult> + Send + Sync>;
pub type OrchestratorHandler =
    Arc<dyn Fn(OrchestrationContext) -> BoxFuture<'static, FunctionResult> + Send + Sync>;
pub type ActivityHandler =
    Arc<dyn Fn(ActivityContext) -> BoxFuture<'static, FunctionResult> + Send + Sync>;

/// Names a function declared by the function set `T`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionRef {
    type_id: TypeId,
    type_name: &'static str,
    name: String,
}

impl FunctionRef {
    /// Function `name` declared by `T`.
    pub fn of<T: 'static>(name: impl Into<String>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) const fn type_id(&self) -> TypeId {
        self.type_id
    }
}

impl fmt::Display for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.type_name, self.name)
    }
}

/// What fires a trigger function.
///
/// String fields may contain `%name%` tokens, resolved when the host
/// indexes the function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerMetadata {
    Http {
        methods: Vec<String>,
        route: Option<String>,
    },
    ServiceBus {
        topic: String,
        subscription: String,
    },
    Queue {
        queue_name: String,
    },
    /// Only invoked by explicit calls.
    Manual,
}

impl TriggerMetadata {
    pub fn http<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Http {
            methods: methods.into_iter().map(Into::into).collect(),
            route: None,
        }
    }

    pub fn service_bus(topic: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self::ServiceBus {
            topic: topic.into(),
            subscription: subscription.into(),
        }
    }

    pub fn queue(queue_name: impl Into<String>) -> Self {
        Self::Queue {
            queue_name: queue_name.into(),
        }
    }

    /// Copy with every `%token%` replaced.
    ///
    /// # Errors
    /// Returns error if a token cannot be resolved.
    pub fn resolve(&self, resolver: &dyn NameResolver) -> Result<Self, ResolveError> {
        Ok(match self {
            Self::Http { methods, route } => Self::Http {
                methods: methods.clone(),
                route: route
                    .as_deref()
                    .map(|r| resolver.resolve_whole_string(r))
                    .transpose()?,
            },
            Self::ServiceBus {
                topic,
                subscription,
            } => Self::ServiceBus {
                topic: resolver.resolve_whole_string(topic)?,
                subscription: resolver.resolve_whole_string(subscription)?,
            },
            Self::Queue { queue_name } => Self::Queue {
                queue_name: resolver.resolve_whole_string(queue_name)?,
            },
            Self::Manual => Self::Manual,
        })
    }

    /// Reason recorded in the `Executing` log line.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Http { .. } => "This function was programmatically called via the host APIs.",
            Self::ServiceBus { .. } => "New ServiceBus message detected.",
            Self::Queue { .. } => "New queue message detected.",
            Self::Manual => "This function was programmatically called via the host APIs.",
        }
    }
}

/// Kind of value a trigger parameter binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    HttpRequest,
    Message,
    Json,
    /// Supplied by the host, never by the caller.
    DurableClient,
}

impl ParameterKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HttpRequest => "http",
            Self::Message => "message",
            Self::Json => "json",
            Self::DurableClient => "durable client",
        }
    }

    /// Whether the caller must provide a value.
    #[must_use]
    pub const fn is_caller_bound(self) -> bool {
        !matches!(self, Self::DurableClient)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub kind: ParameterKind,
}

#[derive(Clone)]
pub enum FunctionKind {
    Trigger {
        trigger: TriggerMetadata,
        parameters: Vec<Parameter>,
        handler: TriggerHandler,
    },
    Orchestrator(OrchestratorHandler),
    Activity(ActivityHandler),
}

impl FunctionKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger { .. } => "trigger",
            Self::Orchestrator(_) => "orchestrator",
            Self::Activity(_) => "activity",
        }
    }
}

/// A single function exposed by a [`FunctionSet`].
#[derive(Clone)]
pub struct FunctionDefinition {
    name: String,
    kind: FunctionKind,
}

impl fmt::Debug for FunctionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind.as_str())
            .finish_non_exhaustive()
    }
}

impl FunctionDefinition {
    /// A function fired by `trigger`.
    ///
    /// Declare its parameters with the `*_parameter` builders.
    pub fn trigger<F, Fut>(name: impl Into<String>, trigger: TriggerMetadata, handler: F) -> Self
    where
        F: Fn(InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FunctionResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            kind: FunctionKind::Trigger {
                trigger,
                parameters: Vec::new(),
                handler: Arc::new(move |ctx: InvocationContext| handler(ctx).boxed()),
            },
        }
    }

    pub fn orchestrator<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(OrchestrationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FunctionResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            kind: FunctionKind::Orchestrator(Arc::new(move |ctx: OrchestrationContext| {
                handler(ctx).boxed()
            })),
        }
    }

    pub fn activity<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ActivityContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FunctionResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            kind: FunctionKind::Activity(Arc::new(move |ctx: ActivityContext| handler(ctx).boxed())),
        }
    }

    fn parameter(mut self, name: impl Into<String>, kind: ParameterKind) -> Self {
        if let FunctionKind::Trigger { parameters, .. } = &mut self.kind {
            parameters.push(Parameter {
                name: name.into(),
                kind,
            });
        }
        self
    }

    /// Bind an HTTP request argument. Ignored for non-trigger functions.
    #[must_use]
    pub fn http_parameter(self, name: impl Into<String>) -> Self {
        self.parameter(name, ParameterKind::HttpRequest)
    }

    /// Bind a queue message argument. Ignored for non-trigger functions.
    #[must_use]
    pub fn message_parameter(self, name: impl Into<String>) -> Self {
        self.parameter(name, ParameterKind::Message)
    }

    /// Bind a JSON argument. Ignored for non-trigger functions.
    #[must_use]
    pub fn json_parameter(self, name: impl Into<String>) -> Self {
        self.parameter(name, ParameterKind::Json)
    }

    /// Inject a durable client. Ignored for non-trigger functions.
    #[must_use]
    pub fn durable_client(self, name: impl Into<String>) -> Self {
        self.parameter(name, ParameterKind::DurableClient)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn kind(&self) -> &FunctionKind {
        &self.kind
    }
}

/// A type that declares functions, constructed from the host's services.
pub trait FunctionSet: Send + Sync + Sized + 'static {
    /// Build the set, resolving its dependencies.
    ///
    /// # Errors
    /// Returns error if a required service is not registered.
    fn create(services: &ServiceProvider) -> Result<Self, ServiceError>;

    /// The functions this set exposes.
    fn functions(self: Arc<Self>) -> Vec<FunctionDefinition>;
}

type Indexer = fn(&ServiceProvider) -> Result<Vec<FunctionDefinition>, ServiceError>;

fn index_set<T: FunctionSet>(services: &ServiceProvider) -> Result<Vec<FunctionDefinition>, ServiceError> {
    Ok(Arc::new(T::create(services)?).functions())
}

#[derive(Clone)]
struct LocatedType {
    type_id: TypeId,
    type_name: &'static str,
    index: Indexer,
}

/// The explicit list of function set types a host indexes.
#[derive(Clone, Default)]
pub struct TypeLocator {
    types: Vec<LocatedType>,
}

impl fmt::Debug for TypeLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.types.iter().map(|t| t.type_name))
            .finish()
    }
}

impl TypeLocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `T`; adding the same type twice has no effect.
    #[must_use]
    pub fn with<T: FunctionSet>(mut self) -> Self {
        let type_id = TypeId::of::<T>();
        if !self.types.iter().any(|t| t.type_id == type_id) {
            self.types.push(LocatedType {
                type_id,
                type_name: type_name::<T>(),
                index: index_set::<T>,
            });
        }
        self
    }

    pub fn type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.types.iter().map(|t| t.type_name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// A function known to a running host.
pub(crate) struct IndexedFunction {
    pub(crate) declared_by: TypeId,
    pub(crate) kind: FunctionKind,
    /// `Function.<name>`, used for host lifecycle lines.
    pub(crate) host_logger: Arc<TestLogger>,
    /// `Function.<name>.User`, handed to user code.
    pub(crate) user_logger: Arc<TestLogger>,
}

/// Functions indexed by name, in discovery order.
#[derive(Default)]
pub(crate) struct FunctionRegistry {
    functions: HashMap<String, IndexedFunction>,
    order: Vec<String>,
}

impl FunctionRegistry {
    /// Construct every located set and collect its functions.
    pub(crate) fn index(
        locator: &TypeLocator,
        services: &ServiceProvider,
        resolver: &dyn NameResolver,
        loggers: &TestLoggerProvider,
    ) -> Result<Self, HostError> {
        let mut registry = Self::default();
        for located in &locator.types {
            let definitions = (located.index)(services).map_err(|source| HostError::Indexing {
                type_name: located.type_name,
                source,
            })?;

            for definition in definitions {
                let FunctionDefinition { name, kind } = definition;
                if registry.functions.contains_key(&name) {
                    return Err(HostError::DuplicateFunction(name));
                }

                let kind = match kind {
                    FunctionKind::Trigger {
                        trigger,
                        parameters,
                        handler,
                    } => FunctionKind::Trigger {
                        trigger: trigger.resolve(resolver).map_err(|source| HostError::Resolve {
                            function: name.clone(),
                            source,
                        })?,
                        parameters,
                        handler,
                    },
                    other => other,
                };

                registry.functions.insert(
                    name.clone(),
                    IndexedFunction {
                        declared_by: located.type_id,
                        kind,
                        host_logger: loggers.create_logger(format!("Function.{name}")),
                        user_logger: loggers.create_logger(format!("Function.{name}.User")),
                    },
                );
                registry.order.push(name);
            }
        }
        Ok(registry)
    }

    pub(crate) fn get(&self, name: &str) -> Option<&IndexedFunction> {
        self.functions.get(name)
    }

    /// Function names in discovery order.
    pub(crate) fn names(&self) -> &[String] {
        &self.order
    }

    pub(crate) fn describe(&self, name: &str) -> Option<String> {
        let function = self.functions.get(name)?;
        Some(match &function.kind {
            FunctionKind::Trigger { trigger, .. } => format!("{name} ({trigger:?})"),
            kind => format!("{name} ({})", kind.as_str()),
        })
    }

    pub(crate) fn orchestrator(&self, name: &str) -> Option<(OrchestratorHandler, Arc<TestLogger>)> {
        match self.functions.get(name) {
            Some(IndexedFunction {
                kind: FunctionKind::Orchestrator(handler),
                user_logger,
                ..
            }) => Some((Arc::clone(handler), Arc::clone(user_logger))),
            _ => None,
        }
    }

    pub(crate) fn activity(&self, name: &str) -> Option<(ActivityHandler, Arc<TestLogger>)> {
        match self.functions.get(name) {
            Some(IndexedFunction {
                kind: FunctionKind::Activity(handler),
                user_logger,
                ..
            }) => Some((Arc::clone(handler), Arc::clone(user_logger))),
            _ => None,
        }
    }
}
