//! Client used by trigger functions to start and inspect orchestrations.

use std::{sync::Arc, time::Duration};

use durable_harness_core::{DurabilityProvider, OrchestrationState, ProviderError};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    OrchestrationError,
    dispatcher::{Runtime, WorkItem},
};

/// Starts orchestrations on the host that created it.
#[derive(Clone)]
pub struct DurableClient {
    runtime: Arc<Runtime>,
}

impl std::fmt::Debug for DurableClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableClient")
            .field("task_hub", &self.task_hub_name())
            .finish()
    }
}

impl DurableClient {
    pub(crate) const fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    #[must_use]
    pub fn task_hub_name(&self) -> &str {
        self.runtime.provider.hub_name()
    }

    /// Schedule a new execution of `orchestrator` and return its instance id.
    ///
    /// A random id is generated when `instance_id` is `None`.
    ///
    /// # Errors
    /// Returns error if the orchestrator is unknown, the instance is still
    /// running, or the host has stopped.
    pub fn start_new<I: Serialize + ?Sized>(
        &self,
        orchestrator: &str,
        instance_id: Option<&str>,
        input: &I,
    ) -> Result<String, OrchestrationError> {
        if self.runtime.registry.orchestrator(orchestrator).is_none() {
            return Err(OrchestrationError::UnknownOrchestrator(orchestrator.to_string()));
        }
        if self.runtime.work.is_closed() {
            return Err(OrchestrationError::HostStopped);
        }

        let instance_id = instance_id.map_or_else(|| Uuid::new_v4().simple().to_string(), str::to_string);
        let input = self.runtime.serializer.to_value(input)?;
        let instance = self
            .runtime
            .provider
            .create_instance(&instance_id, orchestrator, Some(input.clone()))?;

        tracing::debug!(
            target: "Host.Dispatcher",
            instance_id = %instance_id,
            "Scheduling orchestration '{orchestrator}'"
        );
        self.runtime
            .work
            .send(WorkItem::Start {
                instance,
                name: orchestrator.to_string(),
                input: Some(input),
            })
            .map_err(|_| OrchestrationError::HostStopped)?;

        Ok(instance_id)
    }

    /// Latest state of `instance_id`, or `None` if it was never started.
    ///
    /// # Errors
    /// Returns error if the provider is unavailable.
    pub async fn get_status(
        &self,
        instance_id: &str,
    ) -> Result<Option<OrchestrationState>, OrchestrationError> {
        Ok(self
            .runtime
            .provider
            .get_orchestration_state(instance_id, false)
            .await?
            .into_iter()
            .next())
    }

    /// Wait for the latest execution of `instance_id` to finish.
    ///
    /// # Errors
    /// Returns error if the instance is unknown or `timeout` elapses.
    pub async fn wait_for_completion(
        &self,
        instance_id: &str,
        timeout: Duration,
    ) -> Result<OrchestrationState, OrchestrationError> {
        let state = self
            .get_status(instance_id)
            .await?
            .ok_or_else(|| ProviderError::NotFound {
                instance_id: instance_id.to_string(),
                execution_id: None,
            })?;
        Ok(self
            .runtime
            .provider
            .wait_for_orchestration(instance_id, state.execution_id(), timeout)
            .await?)
    }
}
