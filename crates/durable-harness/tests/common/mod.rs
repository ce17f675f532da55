//! Sample function app exercised by the end-to-end tests.

#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use durable_harness::{
    TestHostOptions, TestJobHost, TestJobHostBuilder,
    durable_harness_core::{ServiceCollection, ServiceError, ServiceProvider},
    durable_harness_host::{
        ActivityContext, FunctionDefinition, FunctionResult, FunctionSet, InvocationContext,
        OrchestrationContext, RetryOptions, TriggerMetadata,
    },
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Category the sample functions log under.
pub const CATEGORY: &str = "SampleFunctionApp.SampleFunctions";

#[async_trait]
pub trait MessageQueueService: Send + Sync {
    async fn publish_message(&self, message: &str) -> anyhow::Result<()>;
}

/// Records every published message.
#[derive(Debug, Default)]
pub struct FakeMessageQueueService {
    messages: Mutex<Vec<String>>,
}

impl FakeMessageQueueService {
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl MessageQueueService for FakeMessageQueueService {
    async fn publish_message(&self, message: &str) -> anyhow::Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestServiceBusModel {
    #[serde(rename = "Data")]
    pub data: String,
}

pub struct SampleFunctions;

impl FunctionSet for SampleFunctions {
    fn create(_: &ServiceProvider) -> Result<Self, ServiceError> {
        Ok(Self)
    }

    fn functions(self: Arc<Self>) -> Vec<FunctionDefinition> {
        vec![
            FunctionDefinition::orchestrator("SampleOrchestration", sample_orchestration),
            FunctionDefinition::trigger(
                "HttpTriggerFunction",
                TriggerMetadata::http(["get", "post"]),
                http_trigger_function,
            )
            .http_parameter("req")
            .durable_client("starter"),
            FunctionDefinition::trigger(
                "ServiceBusTriggerFunction",
                TriggerMetadata::service_bus("%TOPIC_NAME%", "%SUBSCRIPTION_NAME%"),
                service_bus_trigger_function,
            )
            .message_parameter("message")
            .durable_client("starter"),
        ]
    }
}

async fn sample_orchestration(ctx: OrchestrationContext) -> FunctionResult {
    let test_string: String = ctx.input()?;
    let retry = RetryOptions::new(Duration::from_secs(30), 5);

    if let Err(e) = ctx
        .call_activity_with_retry::<(), _>("SampleActivityFunction", &retry, &test_string)
        .await
    {
        tracing::error!(target: CATEGORY, "call_activity_with_retry('SampleActivityFunction') failed: {e}");
    }
    Ok(Value::Null)
}

async fn http_trigger_function(ctx: InvocationContext) -> FunctionResult {
    tracing::info!(target: CATEGORY, "HTTP trigger function processed a request.");

    let req = ctx.http_request("req")?;
    let non_empty = |name: &str| req.query(name).filter(|v| !v.is_empty());
    let (Some(data), Some(id)) = (non_empty("data"), non_empty("id")) else {
        return Ok(json!({
            "status": 400,
            "body": "id and data not present in query string params",
        }));
    };

    let starter = ctx.durable_client("starter")?;
    if starter.get_status(&id).await?.is_none() {
        starter.start_new("SampleOrchestration", Some(&id), &data)?;
        tracing::info!(target: CATEGORY, "Started orchestration with ID = '{id}'.");
    }

    Ok(json!({ "status": 200, "body": "Request processed" }))
}

async fn service_bus_trigger_function(ctx: InvocationContext) -> FunctionResult {
    tracing::info!(target: CATEGORY, "Service Bus trigger function processed a message.");

    let message = ctx.message("message")?;
    let instance_id = message.message_id.clone();
    let input: TestServiceBusModel = message.body_json()?;

    let starter = ctx.durable_client("starter")?;
    if starter.get_status(&instance_id).await?.is_none() {
        starter.start_new("SampleOrchestration", Some(&instance_id), &input.data)?;
        tracing::info!(target: CATEGORY, "Started orchestration with ID = '{instance_id}'.");
    }
    Ok(Value::Null)
}

pub struct ActivityFunctions {
    queue: Arc<dyn MessageQueueService>,
}

impl FunctionSet for ActivityFunctions {
    fn create(services: &ServiceProvider) -> Result<Self, ServiceError> {
        Ok(Self {
            queue: services.get_required_service::<dyn MessageQueueService>()?,
        })
    }

    fn functions(self: Arc<Self>) -> Vec<FunctionDefinition> {
        vec![FunctionDefinition::activity(
            "SampleActivityFunction",
            move |ctx: ActivityContext| {
                let this = Arc::clone(&self);
                async move {
                    let message: String = ctx.input()?;
                    this.queue.publish_message(&message).await?;
                    Ok::<_, anyhow::Error>(Value::Null)
                }
            },
        )]
    }
}

/// Services mirroring the sample app's startup, with the queue faked.
pub fn sample_services() -> (ServiceCollection, Arc<FakeMessageQueueService>) {
    let fake = Arc::new(FakeMessageQueueService::default());
    let mut services = ServiceCollection::new();
    services
        .add_singleton::<dyn MessageQueueService>(Arc::clone(&fake) as Arc<dyn MessageQueueService>)
        .add_singleton(Arc::clone(&fake));
    (services, fake)
}

pub fn sample_options() -> TestHostOptions {
    TestHostOptions::default()
        .with_app_setting("TOPIC_NAME", "sample-topic")
        .with_app_setting("SUBSCRIPTION_NAME", "sample-subscription")
}

pub fn sample_builder() -> (TestJobHostBuilder, Arc<FakeMessageQueueService>) {
    let (services, fake) = sample_services();
    let builder = TestJobHost::builder()
        .options(sample_options())
        .function_set::<SampleFunctions>()
        .function_set::<ActivityFunctions>()
        .services(services);
    (builder, fake)
}

pub fn sample_host() -> (TestJobHost, Arc<FakeMessageQueueService>) {
    let (builder, fake) = sample_builder();
    (builder.build(), fake)
}
