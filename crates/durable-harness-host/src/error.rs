//! Host, binding and orchestration errors.

use std::time::Duration;

use durable_harness_core::{ProviderError, ResolveError, ServiceError};
use durable_harness_messages::MessageError;
use thiserror::Error;

/// Mismatch between the arguments of a call and a function's parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("Missing value for parameter '{parameter}' of function '{function}'")]
    MissingArgument { function: String, parameter: String },
    #[error("Function '{function}' has no parameter named '{argument}'")]
    UnknownArgument { function: String, argument: String },
    #[error(
        "Parameter '{parameter}' of function '{function}' expects {expected}, got {actual}"
    )]
    TypeMismatch {
        function: String,
        parameter: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Job host error.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Error indexing function type {type_name}: {source}")]
    Indexing {
        type_name: &'static str,
        #[source]
        source: ServiceError,
    },
    #[error("Error resolving binding expression of function '{function}': {source}")]
    Resolve {
        function: String,
        #[source]
        source: ResolveError,
    },
    #[error("Duplicate function name '{0}'")]
    DuplicateFunction(String),
    #[error("Function '{0}' is not indexed by this host")]
    FunctionNotIndexed(String),
    #[error("Function '{0}' is not a trigger function and cannot be called directly")]
    NotInvocable(String),
    #[error("Job host has not been started")]
    NotStarted,
    #[error("Job host is already started")]
    AlreadyStarted,
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error("Function '{name}' failed: {message}")]
    FunctionFailed { name: String, message: String },
    #[error("Job host shutdown was canceled after {0:?}")]
    ShutdownCanceled(Duration),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Error raised to orchestration and client code.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("No orchestrator function named '{0}' is indexed")]
    UnknownOrchestrator(String),
    #[error("No activity function named '{0}' is indexed")]
    UnknownActivity(String),
    #[error("Activity '{name}' failed: {message}")]
    ActivityFailed { name: String, message: String },
    #[error("Job host is stopped")]
    HostStopped,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Message(#[from] MessageError),
}
