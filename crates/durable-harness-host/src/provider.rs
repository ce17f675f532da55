//! In-memory durability provider.

use std::{collections::HashMap, sync::RwLock, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use durable_harness_core::{
    DurabilityProvider, OrchestrationInstance, OrchestrationQuery, OrchestrationState,
    OrchestrationStatus, ProviderError, QueryResult,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

/// One entry of an execution's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_id: i32,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: HistoryEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "EventType")]
pub enum HistoryEventKind {
    ExecutionStarted {
        name: String,
        input: Option<Value>,
    },
    TaskScheduled {
        name: String,
        input: Option<Value>,
    },
    TaskCompleted {
        scheduled_event_id: i32,
        result: Value,
    },
    TaskFailed {
        scheduled_event_id: i32,
        reason: String,
    },
    TimerCreated {
        fire_at: DateTime<Utc>,
    },
    TimerFired {
        timer_id: i32,
    },
    HttpRequestSent {
        method: String,
        uri: String,
    },
    HttpResponseReceived {
        scheduled_event_id: i32,
        status: u16,
    },
    ExecutionCompleted {
        status: OrchestrationStatus,
        result: Option<Value>,
    },
}

#[derive(Debug, Clone)]
struct ExecutionRecord {
    state: OrchestrationState,
    history: Vec<HistoryEvent>,
}

impl ExecutionRecord {
    fn next_event_id(&self) -> i32 {
        i32::try_from(self.history.len()).unwrap_or(i32::MAX)
    }
}

/// In-memory store of orchestration executions.
///
/// Instances keep every execution, oldest first. Every state change bumps
/// a watch channel so waiters re-check without polling.
pub struct LocalOrchestrationService {
    hub_name: String,
    instances: RwLock<HashMap<String, Vec<ExecutionRecord>>>,
    changes: watch::Sender<u64>,
}

impl std::fmt::Debug for LocalOrchestrationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalOrchestrationService")
            .field("hub_name", &self.hub_name)
            .finish_non_exhaustive()
    }
}

impl LocalOrchestrationService {
    /// Create an empty store for the task hub `hub_name`.
    #[must_use]
    pub fn new(hub_name: impl Into<String>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            hub_name: hub_name.into(),
            instances: RwLock::new(HashMap::new()),
            changes,
        }
    }

    #[must_use]
    pub fn hub_name(&self) -> &str {
        &self.hub_name
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    fn with_execution<R>(
        &self,
        instance: &OrchestrationInstance,
        f: impl FnOnce(&mut ExecutionRecord) -> R,
    ) -> Result<R, ProviderError> {
        let mut instances = self
            .instances
            .write()
            .map_err(|e| ProviderError::Internal(e.to_string()))?;

        let record = instances
            .get_mut(&instance.instance_id)
            .and_then(|executions| {
                executions
                    .iter_mut()
                    .find(|r| r.state.instance.execution_id == instance.execution_id)
            })
            .ok_or_else(|| ProviderError::NotFound {
                instance_id: instance.instance_id.clone(),
                execution_id: Some(instance.execution_id.clone()),
            })?;

        let result = f(record);
        drop(instances);
        self.notify();
        Ok(result)
    }

    /// Record a new pending execution of `instance_id`.
    ///
    /// # Errors
    /// Returns [`ProviderError::InstanceExists`] if the latest execution of
    /// `instance_id` has not reached a terminal status.
    pub fn create_instance(
        &self,
        instance_id: &str,
        name: &str,
        input: Option<Value>,
    ) -> Result<OrchestrationInstance, ProviderError> {
        let mut instances = self
            .instances
            .write()
            .map_err(|e| ProviderError::Internal(e.to_string()))?;

        let executions = instances.entry(instance_id.to_string()).or_default();
        if executions
            .last()
            .is_some_and(|r| !r.state.status.is_terminal())
        {
            return Err(ProviderError::InstanceExists(instance_id.to_string()));
        }

        let now = Utc::now();
        let instance = OrchestrationInstance {
            instance_id: instance_id.to_string(),
            execution_id: Uuid::new_v4().simple().to_string(),
        };
        executions.push(ExecutionRecord {
            state: OrchestrationState {
                instance: instance.clone(),
                name: name.to_string(),
                status: OrchestrationStatus::Pending,
                input: input.clone(),
                output: None,
                created_time: now,
                last_updated_time: now,
                completed_time: None,
            },
            history: vec![HistoryEvent {
                event_id: 0,
                timestamp: now,
                kind: HistoryEventKind::ExecutionStarted {
                    name: name.to_string(),
                    input,
                },
            }],
        });
        drop(instances);

        self.notify();
        Ok(instance)
    }

    /// Move a pending execution to `Running`.
    ///
    /// # Errors
    /// Returns error if the execution is unknown.
    pub fn mark_running(&self, instance: &OrchestrationInstance) -> Result<(), ProviderError> {
        self.with_execution(instance, |record| {
            record.state.status = OrchestrationStatus::Running;
            record.state.last_updated_time = Utc::now();
        })
    }

    /// Append a history event and return its id.
    ///
    /// # Errors
    /// Returns error if the execution is unknown.
    pub fn append_event(
        &self,
        instance: &OrchestrationInstance,
        kind: HistoryEventKind,
    ) -> Result<i32, ProviderError> {
        self.with_execution(instance, |record| {
            let now = Utc::now();
            let event_id = record.next_event_id();
            record.history.push(HistoryEvent {
                event_id,
                timestamp: now,
                kind,
            });
            record.state.last_updated_time = now;
            event_id
        })
    }

    /// Finish an execution with a terminal `status`.
    ///
    /// # Errors
    /// Returns error if the execution is unknown.
    pub fn complete(
        &self,
        instance: &OrchestrationInstance,
        status: OrchestrationStatus,
        output: Option<Value>,
    ) -> Result<(), ProviderError> {
        self.with_execution(instance, |record| {
            let now = Utc::now();
            let event_id = record.next_event_id();
            record.history.push(HistoryEvent {
                event_id,
                timestamp: now,
                kind: HistoryEventKind::ExecutionCompleted {
                    status,
                    result: output.clone(),
                },
            });
            record.state.status = status;
            record.state.output = output;
            record.state.last_updated_time = now;
            record.state.completed_time = Some(now);
        })
    }

    fn latest_state(&self, instance_id: &str) -> Result<Option<OrchestrationState>, ProviderError> {
        Ok(self
            .instances
            .read()
            .map_err(|e| ProviderError::Internal(e.to_string()))?
            .get(instance_id)
            .and_then(|executions| executions.last())
            .map(|r| r.state.clone()))
    }

    fn execution_state(
        &self,
        instance_id: &str,
        execution_id: &str,
    ) -> Result<OrchestrationState, ProviderError> {
        self.instances
            .read()
            .map_err(|e| ProviderError::Internal(e.to_string()))?
            .get(instance_id)
            .and_then(|executions| {
                executions
                    .iter()
                    .find(|r| r.state.instance.execution_id == execution_id)
            })
            .map(|r| r.state.clone())
            .ok_or_else(|| ProviderError::NotFound {
                instance_id: instance_id.to_string(),
                execution_id: Some(execution_id.to_string()),
            })
    }

    async fn wait_terminal(
        &self,
        instance_id: &str,
        execution_id: &str,
    ) -> Result<OrchestrationState, ProviderError> {
        let mut changes = self.changes.subscribe();
        loop {
            let state = self.execution_state(instance_id, execution_id)?;
            if state.status.is_terminal() {
                return Ok(state);
            }
            changes
                .changed()
                .await
                .map_err(|e| ProviderError::Internal(e.to_string()))?;
        }
    }

    /// Latest state of `instance_id`, if any execution exists.
    ///
    /// # Errors
    /// Returns error if the store is unavailable.
    pub fn status(&self, instance_id: &str) -> Result<Option<OrchestrationState>, ProviderError> {
        self.latest_state(instance_id)
    }
}

#[async_trait]
impl DurabilityProvider for LocalOrchestrationService {
    fn name(&self) -> &str {
        "LocalOrchestrationService"
    }

    async fn get_orchestration_state(
        &self,
        instance_id: &str,
        all_executions: bool,
    ) -> Result<Vec<OrchestrationState>, ProviderError> {
        let instances = self
            .instances
            .read()
            .map_err(|e| ProviderError::Internal(e.to_string()))?;

        let Some(executions) = instances.get(instance_id) else {
            return Ok(Vec::new());
        };

        let newest_first = executions.iter().rev().map(|r| r.state.clone());
        Ok(if all_executions {
            newest_first.collect()
        } else {
            newest_first.take(1).collect()
        })
    }

    async fn get_orchestration_history(
        &self,
        instance_id: &str,
        execution_id: &str,
    ) -> Result<String, ProviderError> {
        let instances = self
            .instances
            .read()
            .map_err(|e| ProviderError::Internal(e.to_string()))?;

        let record = instances
            .get(instance_id)
            .and_then(|executions| {
                executions
                    .iter()
                    .find(|r| r.state.instance.execution_id == execution_id)
            })
            .ok_or_else(|| ProviderError::NotFound {
                instance_id: instance_id.to_string(),
                execution_id: Some(execution_id.to_string()),
            })?;

        serde_json::to_string(&record.history).map_err(|e| ProviderError::Internal(e.to_string()))
    }

    async fn wait_for_orchestration(
        &self,
        instance_id: &str,
        execution_id: &str,
        timeout: Duration,
    ) -> Result<OrchestrationState, ProviderError> {
        tokio::time::timeout(timeout, self.wait_terminal(instance_id, execution_id))
            .await
            .map_err(|_| ProviderError::Timeout {
                instance_id: instance_id.to_string(),
                timeout,
            })?
    }

    async fn query_orchestrations(
        &self,
        query: &OrchestrationQuery,
    ) -> Result<QueryResult, ProviderError> {
        let offset = match query.continuation_token.as_deref() {
            None => 0,
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| ProviderError::InvalidContinuationToken(token.to_string()))?,
        };

        let mut states: Vec<OrchestrationState> = self
            .instances
            .read()
            .map_err(|e| ProviderError::Internal(e.to_string()))?
            .values()
            .filter_map(|executions| executions.last())
            .map(|r| r.state.clone())
            .filter(|state| query.matches(state))
            .collect();

        // Oldest first; ties broken by id so pages are stable.
        states.sort_by(|a, b| {
            a.created_time
                .cmp(&b.created_time)
                .then_with(|| a.instance.instance_id.cmp(&b.instance.instance_id))
        });

        let page_size = query.page_size.max(1);
        let total = states.len();
        let page: Vec<_> = states.into_iter().skip(offset).take(page_size).collect();
        let next = offset + page.len();

        Ok(QueryResult {
            states: page,
            continuation_token: (next < total).then(|| next.to_string()),
        })
    }
}
