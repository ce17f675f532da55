//! Orchestration state types and the durability provider trait.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Runtime status of one orchestration execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrchestrationStatus {
    /// Created but not yet picked up by a worker.
    Pending,
    /// Currently running.
    Running,
    /// Restarted with new input as a fresh execution.
    ContinuedAsNew,
    /// Completed successfully.
    Completed,
    /// Failed with an error.
    Failed,
    /// Cancelled before completion.
    Canceled,
    /// Terminated by a client.
    Terminated,
}

impl OrchestrationStatus {
    /// Whether the execution will not change any further.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Canceled | Self::Terminated
        )
    }
}

impl fmt::Display for OrchestrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::ContinuedAsNew => write!(f, "ContinuedAsNew"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::Canceled => write!(f, "Canceled"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Identifies a single execution of an orchestration instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrchestrationInstance {
    pub instance_id: String,
    pub execution_id: String,
}

/// Observed state of one orchestration execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub instance: OrchestrationInstance,
    /// Orchestrator function name.
    pub name: String,
    pub status: OrchestrationStatus,
    pub input: Option<Value>,
    /// Result on success, error text on failure.
    pub output: Option<Value>,
    pub created_time: DateTime<Utc>,
    pub last_updated_time: DateTime<Utc>,
    pub completed_time: Option<DateTime<Utc>>,
}

impl OrchestrationState {
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance.instance_id
    }

    #[must_use]
    pub fn execution_id(&self) -> &str {
        &self.instance.execution_id
    }
}

/// Filter for bulk orchestration queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationQuery {
    /// Only these statuses; empty means any.
    pub runtime_status: Vec<OrchestrationStatus>,
    pub created_time_from: Option<DateTime<Utc>>,
    pub created_time_to: Option<DateTime<Utc>>,
    pub instance_id_prefix: Option<String>,
    /// Maximum states per page.
    pub page_size: usize,
    /// Token returned by the previous page.
    pub continuation_token: Option<String>,
}

impl Default for OrchestrationQuery {
    fn default() -> Self {
        Self {
            runtime_status: Vec::new(),
            created_time_from: None,
            created_time_to: None,
            instance_id_prefix: None,
            page_size: 100,
            continuation_token: None,
        }
    }
}

impl OrchestrationQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_status(mut self, status: OrchestrationStatus) -> Self {
        self.runtime_status.push(status);
        self
    }

    #[must_use]
    pub fn with_instance_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.instance_id_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn with_continuation_token(mut self, token: Option<String>) -> Self {
        self.continuation_token = token;
        self
    }

    /// Whether `state` passes every filter of this query.
    #[must_use]
    pub fn matches(&self, state: &OrchestrationState) -> bool {
        if !self.runtime_status.is_empty() && !self.runtime_status.contains(&state.status) {
            return false;
        }
        if let Some(from) = self.created_time_from {
            if state.created_time < from {
                return false;
            }
        }
        if let Some(to) = self.created_time_to {
            if state.created_time > to {
                return false;
            }
        }
        if let Some(ref prefix) = self.instance_id_prefix {
            if !state.instance.instance_id.starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub states: Vec<OrchestrationState>,
    /// Present when more results remain.
    pub continuation_token: Option<String>,
}

/// Durability provider error.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Orchestration instance not found: {instance_id} (execution {execution_id:?})")]
    NotFound {
        instance_id: String,
        execution_id: Option<String>,
    },
    #[error("An orchestration with instance id '{0}' is already running")]
    InstanceExists(String),
    #[error("Timed out after {timeout:?} waiting for orchestration '{instance_id}'")]
    Timeout {
        instance_id: String,
        timeout: Duration,
    },
    #[error("Invalid continuation token: {0}")]
    InvalidContinuationToken(String),
    #[error("Provider error: {0}")]
    Internal(String),
}

/// Storage and query backend behind orchestration state and history.
#[async_trait]
pub trait DurabilityProvider: Send + Sync {
    /// Provider name.
    fn name(&self) -> &str;

    /// States for `instance_id`, newest execution first.
    ///
    /// With `all_executions` false at most the most recent execution is
    /// returned. An unknown id yields an empty list.
    async fn get_orchestration_state(
        &self,
        instance_id: &str,
        all_executions: bool,
    ) -> Result<Vec<OrchestrationState>, ProviderError>;

    /// Serialized history of one execution.
    async fn get_orchestration_history(
        &self,
        instance_id: &str,
        execution_id: &str,
    ) -> Result<String, ProviderError>;

    /// Block until the execution reaches a terminal status.
    ///
    /// # Errors
    /// Returns [`ProviderError::Timeout`] if `timeout` elapses first.
    async fn wait_for_orchestration(
        &self,
        instance_id: &str,
        execution_id: &str,
        timeout: Duration,
    ) -> Result<OrchestrationState, ProviderError>;

    /// One page of the most recent execution of every matching instance.
    async fn query_orchestrations(
        &self,
        query: &OrchestrationQuery,
    ) -> Result<QueryResult, ProviderError>;
}
