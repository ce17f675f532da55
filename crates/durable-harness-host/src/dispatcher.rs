//! Orchestration dispatcher and the state shared by a running host.

use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::Arc,
};

use durable_harness_core::{
    OrchestrationInstance, OrchestrationStatus, ServiceProvider, TestLogger,
};
use durable_harness_messages::SerializerSettings;
use futures::{FutureExt, future::BoxFuture};
use serde_json::Value;
use tokio::{
    sync::{Semaphore, mpsc, oneshot},
    task::JoinSet,
};
use tracing::{Dispatch, instrument::WithSubscriber};

use crate::{
    HttpHandlerFactory, LocalOrchestrationService, OrchestrationContext,
    function::{FunctionRegistry, FunctionResult},
};

/// Request to run an orchestration execution.
#[derive(Debug)]
pub(crate) enum WorkItem {
    Start {
        instance: OrchestrationInstance,
        name: String,
        input: Option<Value>,
    },
}

/// Everything function code reaches through its context while the host runs.
pub(crate) struct Runtime {
    pub(crate) registry: FunctionRegistry,
    pub(crate) provider: Arc<LocalOrchestrationService>,
    pub(crate) services: ServiceProvider,
    pub(crate) serializer: SerializerSettings,
    pub(crate) http: Arc<dyn HttpHandlerFactory>,
    pub(crate) orchestrator_slots: Arc<Semaphore>,
    pub(crate) activity_slots: Semaphore,
    pub(crate) work: mpsc::UnboundedSender<WorkItem>,
    pub(crate) dispatch: Dispatch,
}

/// Run a user handler, turning a panic into an error.
pub(crate) async fn run_guarded<C>(
    handler: &(dyn Fn(C) -> BoxFuture<'static, FunctionResult> + Send + Sync),
    ctx: C,
) -> FunctionResult {
    let future = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(ctx))) {
        Ok(future) => future,
        Err(payload) => return Err(panicked(payload.as_ref())),
    };
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(panicked(payload.as_ref())),
    }
}

fn panicked(payload: &(dyn Any + Send)) -> anyhow::Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    anyhow::anyhow!("function panicked: {message}")
}

/// Receive work until shutdown, then drain in-flight orchestrations.
///
/// Work still queued at shutdown is not run; see [`cancel_queued`].
pub(crate) async fn run(
    runtime: Arc<Runtime>,
    mut work: mpsc::UnboundedReceiver<WorkItem>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut running = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            item = work.recv() => match item {
                Some(WorkItem::Start { instance, name, input }) => {
                    tracing::debug!(
                        target: "Host.Dispatcher",
                        instance_id = %instance.instance_id,
                        execution_id = %instance.execution_id,
                        "Dispatching orchestration '{name}'"
                    );
                    running.spawn(
                        execute(Arc::clone(&runtime), instance, name, input)
                            .with_subscriber(runtime.dispatch.clone()),
                    );
                }
                None => break,
            },
            Some(joined) = running.join_next(), if !running.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(target: "Host.Dispatcher", "Orchestration task failed: {e}");
                }
            }
        }
    }

    cancel_queued(&runtime.provider, &mut work);
    tracing::debug!(
        target: "Host.Dispatcher",
        in_flight = running.len(),
        "Dispatcher draining"
    );
    while let Some(joined) = running.join_next().await {
        if let Err(e) = joined {
            tracing::error!(target: "Host.Dispatcher", "Orchestration task failed: {e}");
        }
    }
}

/// Close the queue and mark every start request still in it `Canceled`.
fn cancel_queued(provider: &LocalOrchestrationService, work: &mut mpsc::UnboundedReceiver<WorkItem>) {
    work.close();
    while let Ok(WorkItem::Start { instance, name, .. }) = work.try_recv() {
        tracing::warn!(
            target: "Host.Dispatcher",
            instance_id = %instance.instance_id,
            execution_id = %instance.execution_id,
            "Orchestration '{name}' was queued at shutdown and will not run"
        );
        let reason = Value::from("Host stopped before the orchestration was dispatched");
        if let Err(e) = provider.complete(&instance, OrchestrationStatus::Canceled, Some(reason)) {
            tracing::error!(
                target: "Host.Dispatcher",
                instance_id = %instance.instance_id,
                "Failed to record orchestration result: {e}"
            );
        }
    }
}

async fn execute(
    runtime: Arc<Runtime>,
    instance: OrchestrationInstance,
    name: String,
    input: Option<Value>,
) {
    let Ok(_permit) = Arc::clone(&runtime.orchestrator_slots).acquire_owned().await else {
        return;
    };

    let (status, output) = match runtime.registry.orchestrator(&name) {
        Some((handler, logger)) => run_orchestrator(&runtime, &instance, &name, input, &*handler, logger).await,
        None => (
            OrchestrationStatus::Failed,
            Some(Value::from(format!("No orchestrator function named '{name}' is indexed"))),
        ),
    };

    if let Err(e) = runtime.provider.complete(&instance, status, output) {
        tracing::error!(
            target: "Host.Dispatcher",
            instance_id = %instance.instance_id,
            "Failed to record orchestration result: {e}"
        );
        return;
    }

    tracing::info!(
        target: "Host.Dispatcher",
        instance_id = %instance.instance_id,
        execution_id = %instance.execution_id,
        status = %status,
        "Orchestration '{name}' finished"
    );
}

async fn run_orchestrator(
    runtime: &Arc<Runtime>,
    instance: &OrchestrationInstance,
    name: &str,
    input: Option<Value>,
    handler: &(dyn Fn(OrchestrationContext) -> BoxFuture<'static, FunctionResult> + Send + Sync),
    logger: Arc<TestLogger>,
) -> (OrchestrationStatus, Option<Value>) {
    if let Err(e) = runtime.provider.mark_running(instance) {
        return (OrchestrationStatus::Failed, Some(Value::from(e.to_string())));
    }
    tracing::info!(
        target: "Host.Dispatcher",
        instance_id = %instance.instance_id,
        "Orchestration '{name}' started"
    );

    let ctx = OrchestrationContext::new(
        Arc::clone(runtime),
        instance.clone(),
        name.to_string(),
        input,
        logger,
    );
    match run_guarded(handler, ctx).await {
        Ok(Value::Null) => (OrchestrationStatus::Completed, None),
        Ok(value) => (OrchestrationStatus::Completed, Some(value)),
        Err(e) => {
            tracing::warn!(
                target: "Host.Dispatcher",
                instance_id = %instance.instance_id,
                "Orchestration '{name}' failed: {e:#}"
            );
            (OrchestrationStatus::Failed, Some(Value::from(format!("{e:#}"))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use durable_harness_core::DurabilityProvider;

    fn handler<F>(f: F) -> Arc<dyn Fn(u32) -> BoxFuture<'static, FunctionResult> + Send + Sync>
    where
        F: Fn(u32) -> FunctionResult + Send + Sync + Copy + 'static,
    {
        Arc::new(move |n: u32| async move { f(n) }.boxed())
    }

    #[tokio::test]
    async fn results_pass_through() {
        let double = handler(|n| Ok(Value::from(n * 2)));
        assert_eq!(run_guarded(&*double, 21).await.unwrap(), Value::from(42));
    }

    #[tokio::test]
    async fn queued_work_is_canceled_at_shutdown() {
        let provider = LocalOrchestrationService::new("TestHub");
        let (work, mut receiver) = mpsc::unbounded_channel();
        let instance = provider
            .create_instance("queued-1", "SampleOrchestration", None)
            .unwrap();
        work.send(WorkItem::Start {
            instance: instance.clone(),
            name: "SampleOrchestration".to_string(),
            input: None,
        })
        .unwrap();

        cancel_queued(&provider, &mut receiver);

        let states = provider.get_orchestration_state("queued-1", false).await.unwrap();
        assert_eq!(states[0].status, OrchestrationStatus::Canceled);
        assert!(work.send(WorkItem::Start { instance, name: String::new(), input: None }).is_err());
    }

    #[tokio::test]
    async fn panics_become_errors() {
        let boom = handler(|_| panic!("boom"));
        let err = run_guarded(&*boom, 0).await.unwrap_err();
        assert!(err.to_string().contains("boom"));

        let eager: Arc<dyn Fn(u32) -> BoxFuture<'static, FunctionResult> + Send + Sync> =
            Arc::new(|_: u32| -> BoxFuture<'static, FunctionResult> { panic!("before the future") });
        let err = run_guarded(&*eager, 0).await.unwrap_err();
        assert!(err.to_string().contains("before the future"));
    }
}
