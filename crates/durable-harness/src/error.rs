//! Harness errors.

use std::{path::PathBuf, time::Duration};

use durable_harness_core::{ProviderError, ServiceError};
use durable_harness_host::HostError;
use thiserror::Error;

/// Error returned by [`TestJobHost`](crate::TestJobHost) operations.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("{0}")]
    Configuration(String),
    #[error("Test job host has not been started")]
    NotStarted,
    #[error("Test job host has been stopped")]
    Stopped,
    #[error("No orchestration with instance id '{0}' exists")]
    OrchestrationNotFound(String),
    #[error("Orchestration '{instance_id}' did not complete within {timeout:?}")]
    Timeout {
        instance_id: String,
        timeout: Duration,
    },
    #[error("Orchestration state is looked up by instance id; last-state tracking is disabled")]
    TrackingDisabled,
    #[error("No orchestration has been awaited yet")]
    NoTrackedOrchestration,
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("Failed to load settings from {}: {source}", path.display())]
    Settings {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl HarnessError {
    pub(crate) fn no_services() -> Self {
        Self::Configuration("No services are configured for test job host".to_string())
    }
}
