//! In-process job host for durable function tests.
//!
//! Provides:
//! - `FunctionHost` - Indexes function sets, invokes triggers, dispatches orchestrations
//! - `LocalOrchestrationService` - In-memory durability provider with history
//! - Invocation, orchestration and activity contexts handed to function code

pub mod client;
pub mod context;
mod dispatcher;
pub mod error;
pub mod function;
pub mod host;
pub mod http_handler;
pub mod provider;

pub use client::DurableClient;
pub use context::{ActivityContext, InvocationContext, OrchestrationContext, RetryOptions};
pub use error::{BindingError, HostError, OrchestrationError};
pub use function::{
    ActivityHandler, FunctionDefinition, FunctionKind, FunctionRef, FunctionResult, FunctionSet,
    OrchestratorHandler, Parameter, ParameterKind, TriggerHandler, TriggerMetadata, TypeLocator,
};
pub use host::{
    FunctionHost, HostConfiguration, HostFactory, HostSettings, InProcessHostFactory, JobHost,
};
pub use http_handler::{DefaultHttpHandlerFactory, HttpHandler, HttpHandlerFactory};
pub use provider::{HistoryEvent, HistoryEventKind, LocalOrchestrationService};
