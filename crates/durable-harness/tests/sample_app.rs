//! End-to-end scenarios against the sample function app.

mod common;

use common::{CATEGORY, FakeMessageQueueService, SampleFunctions, TestServiceBusModel, sample_host};
use durable_harness::{
    HarnessError, OrchestrationTracking,
    durable_harness_core::{LogLevel, OrchestrationStatus, ServiceError},
    durable_harness_host::{BindingError, FunctionRef, HostError},
    durable_harness_messages::{
        DefaultSerializerSettingsFactory, FunctionArguments, MessageSerializerSettingsFactory,
        QueueMessage, create_http_request,
    },
};
use serde_json::Value;

const INSTANCE_ID: &str = "1000";

fn http_trigger() -> FunctionRef {
    FunctionRef::of::<SampleFunctions>("HttpTriggerFunction")
}

fn http_arguments(query: &str) -> FunctionArguments {
    let uri = format!("https://fakehost.com/api/SampleHttpFunction?{query}");
    let request = create_http_request("get", &uri, None, None).unwrap();
    FunctionArguments::new().with("req", request)
}

fn info(message: &str) -> (LogLevel, String) {
    (LogLevel::Information, message.to_string())
}

#[tokio::test]
async fn http_trigger_runs_the_sample_orchestration() {
    durable_harness::init_tracing();
    let (host, _) = sample_host();
    host.start().await.unwrap();

    let response = host
        .invoke(&http_trigger(), http_arguments("id=1000&data=hello"))
        .await
        .unwrap();
    assert_eq!(response["body"], "Request processed");

    let state = host.await_orchestration(INSTANCE_ID).await.unwrap();
    assert_eq!(state.status, OrchestrationStatus::Completed);
    assert_eq!(state.name, "SampleOrchestration");

    let (state, history) = host
        .orchestration_state_with_history(INSTANCE_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.status, OrchestrationStatus::Completed);
    assert!(history.contains("SampleActivityFunction"));
    assert!(history.contains("ExecutionCompleted"));

    let queue = host.get_service::<FakeMessageQueueService>().await.unwrap();
    assert_eq!(queue.messages(), ["hello"]);

    let logger = host.logger_by_category(CATEGORY).unwrap();
    assert_eq!(
        logger.messages(),
        [
            info("HTTP trigger function processed a request."),
            info("Started orchestration with ID = '1000'."),
        ]
    );

    host.dispose().await.unwrap();
}

#[tokio::test]
async fn service_bus_trigger_runs_the_sample_orchestration() {
    let (host, fake) = sample_host();
    host.start().await.unwrap();

    let settings = DefaultSerializerSettingsFactory.create_serializer_settings();
    let message = QueueMessage::from_json(
        INSTANCE_ID,
        &TestServiceBusModel {
            data: "hello".to_string(),
        },
        &settings,
    )
    .unwrap();
    host.invoke(
        &FunctionRef::of::<SampleFunctions>("ServiceBusTriggerFunction"),
        FunctionArguments::new().with("message", message),
    )
    .await
    .unwrap();

    let state = host.await_orchestration(INSTANCE_ID).await.unwrap();
    assert_eq!(state.status, OrchestrationStatus::Completed);
    assert_eq!(state.name, "SampleOrchestration");
    assert_eq!(fake.messages(), ["hello"]);

    let logger = host.logger_by_category(CATEGORY).unwrap();
    assert_eq!(
        logger.messages(),
        [
            info("Service Bus trigger function processed a message."),
            info("Started orchestration with ID = '1000'."),
        ]
    );

    host.dispose().await.unwrap();
}

#[tokio::test]
async fn duplicate_instance_id_starts_one_orchestration() {
    let (host, fake) = sample_host();
    host.start().await.unwrap();

    host.invoke(&http_trigger(), http_arguments("id=1000&data=hello"))
        .await
        .unwrap();
    host.invoke(&http_trigger(), http_arguments("id=1000&data=again"))
        .await
        .unwrap();
    host.await_orchestration(INSTANCE_ID).await.unwrap();

    let states = host.orchestration_states(None).await.unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(fake.messages(), ["hello"]);

    let started = host
        .logger_by_category(CATEGORY)
        .unwrap()
        .messages()
        .into_iter()
        .filter(|(_, message)| message.starts_with("Started orchestration"))
        .count();
    assert_eq!(started, 1);

    host.dispose().await.unwrap();
}

#[tokio::test]
async fn bad_request_starts_nothing() {
    let (host, fake) = sample_host();

    let response = host
        .invoke(&http_trigger(), http_arguments("id=1000"))
        .await
        .unwrap();
    assert_eq!(response["status"], 400);

    let err = host.await_orchestration(INSTANCE_ID).await.unwrap_err();
    assert!(matches!(err, HarnessError::OrchestrationNotFound(id) if id == INSTANCE_ID));
    assert!(
        host.orchestration_state_with_history(INSTANCE_ID)
            .await
            .unwrap()
            .is_none()
    );
    assert!(fake.messages().is_empty());

    host.dispose().await.unwrap();
}

#[tokio::test]
async fn binding_errors_surface_unchanged() {
    let (host, _) = sample_host();
    host.start().await.unwrap();

    let request = create_http_request("get", "https://fakehost.com/api?id=1", None, None).unwrap();
    let err = host
        .invoke(&http_trigger(), FunctionArguments::new().with("request", request))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Host(HostError::Binding(BindingError::UnknownArgument { argument, .. }))
            if argument == "request"
    ));

    let err = host
        .invoke(
            &http_trigger(),
            FunctionArguments::new().with("req", Value::from("not a request")),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Host(HostError::Binding(BindingError::TypeMismatch { .. }))
    ));

    host.dispose().await.unwrap();
}

#[tokio::test]
async fn host_and_function_loggers_are_captured() {
    let (host, _) = sample_host();
    host.invoke(&http_trigger(), http_arguments("id=1000&data=hello"))
        .await
        .unwrap();
    host.await_orchestration(INSTANCE_ID).await.unwrap();

    let lifecycle = host
        .logger_by_category("Function.HttpTriggerFunction")
        .unwrap()
        .messages();
    assert_eq!(lifecycle.len(), 2);
    assert!(lifecycle[0].1.starts_with("Executing 'Functions.HttpTriggerFunction'"));
    assert!(lifecycle[1].1.starts_with("Executed 'Functions.HttpTriggerFunction' (Succeeded"));

    assert!(host.logger_by_function_name("SampleActivityFunction").is_some());
    assert!(host.logger_by_function_name("NoSuchFunction").is_none());

    let startup = host.logger_by_category("Host.Startup").unwrap().messages();
    assert!(startup.iter().any(|(_, m)| m.contains("HttpTriggerFunction")));
    assert!(startup.iter().any(|(_, m)| m == "Job host started"));

    host.dispose().await.unwrap();
}

#[tokio::test]
async fn services_resolve_from_the_running_host() {
    let (host, _) = sample_host();
    host.start().await.unwrap();

    host.get_service::<dyn common::MessageQueueService>()
        .await
        .unwrap();
    let err = host.get_service::<String>().await.unwrap_err();
    assert!(matches!(err, HarnessError::Service(ServiceError::NotRegistered(_))));

    host.dispose().await.unwrap();
    assert!(matches!(
        host.get_service::<FakeMessageQueueService>().await,
        Err(HarnessError::Stopped)
    ));
}

#[tokio::test]
async fn last_awaited_state_is_tracked() {
    let (builder, _) = common::sample_builder();
    let host = builder
        .options(
            common::sample_options().with_tracking(OrchestrationTracking::TrackLast),
        )
        .build();

    host.invoke(&http_trigger(), http_arguments("id=1000&data=hello"))
        .await
        .unwrap();
    let awaited = host.await_orchestration(INSTANCE_ID).await.unwrap();

    let (state, history) = host.last_orchestration_state_with_history().await.unwrap();
    assert_eq!(state, awaited);
    assert!(history.contains("TaskCompleted"));

    host.dispose().await.unwrap();
}
