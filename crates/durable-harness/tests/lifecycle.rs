//! Start, stop and dispose behaviour of the test job host.

mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use common::{SampleFunctions, sample_builder};
use durable_harness::{
    HarnessError, HostState, TestHostOptions, TestJobHost,
    durable_harness_core::{
        DurabilityProvider, ServiceCollection, ServiceProvider, TestLoggerProvider,
    },
    durable_harness_host::{
        FunctionRef, HostConfiguration, HostError, HostFactory, InProcessHostFactory, JobHost,
        LocalOrchestrationService,
    },
    durable_harness_messages::{FunctionArguments, create_http_request},
};
use serde_json::Value;

/// Counts builds and delegates to the real in-process factory.
#[derive(Default)]
struct CountingFactory {
    builds: AtomicUsize,
}

impl HostFactory for CountingFactory {
    fn build(&self, configuration: HostConfiguration) -> Result<Box<dyn JobHost>, HostError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        InProcessHostFactory.build(configuration)
    }
}

/// What a [`FakeHost`] observed.
#[derive(Default)]
struct Probe {
    stops: AtomicUsize,
    shutdown_now: AtomicBool,
    dropped: AtomicBool,
}

/// Job host whose `stop` fails with a chosen error.
struct FakeHost {
    probe: Arc<Probe>,
    stop_error: fn() -> HostError,
    services: ServiceProvider,
    provider: Arc<LocalOrchestrationService>,
}

#[async_trait]
impl JobHost for FakeHost {
    async fn start(&self) -> Result<(), HostError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), HostError> {
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
        Err((self.stop_error)())
    }

    fn shutdown_now(&self) {
        self.probe.shutdown_now.store(true, Ordering::SeqCst);
    }

    async fn call(&self, _: &FunctionRef, _: FunctionArguments) -> Result<Value, HostError> {
        Ok(Value::Null)
    }

    fn services(&self) -> &ServiceProvider {
        &self.services
    }

    fn durability_provider(&self) -> Arc<dyn DurabilityProvider> {
        Arc::clone(&self.provider) as Arc<dyn DurabilityProvider>
    }
}

impl Drop for FakeHost {
    fn drop(&mut self) {
        self.probe.dropped.store(true, Ordering::SeqCst);
    }
}

struct FakeFactory {
    probe: Arc<Probe>,
    stop_error: fn() -> HostError,
}

impl HostFactory for FakeFactory {
    fn build(&self, configuration: HostConfiguration) -> Result<Box<dyn JobHost>, HostError> {
        Ok(Box::new(FakeHost {
            probe: Arc::clone(&self.probe),
            stop_error: self.stop_error,
            services: configuration.services.build(),
            provider: Arc::new(LocalOrchestrationService::new(configuration.settings.hub_name)),
        }))
    }
}

fn fake_host(stop_error: fn() -> HostError) -> (TestJobHost, Arc<Probe>) {
    let probe = Arc::new(Probe::default());
    let (builder, _) = sample_builder();
    let host = builder
        .host_factory(Arc::new(FakeFactory {
            probe: Arc::clone(&probe),
            stop_error,
        }))
        .build();
    (host, probe)
}

fn canceled() -> HostError {
    HostError::ShutdownCanceled(Duration::from_secs(5))
}

#[tokio::test]
async fn start_twice_builds_one_host() {
    let factory = Arc::new(CountingFactory::default());
    let (builder, _) = sample_builder();
    let host = builder.host_factory(Arc::clone(&factory) as Arc<dyn HostFactory>).build();

    host.start().await.unwrap();
    host.start().await.unwrap();
    let (first, second) = tokio::join!(host.start(), host.start());
    first.unwrap();
    second.unwrap();

    assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
    assert_eq!(host.state().await, HostState::Running);
    host.dispose().await.unwrap();
}

#[tokio::test]
async fn empty_services_never_build_a_host() {
    for services in [Some(ServiceCollection::new()), None] {
        let factory = Arc::new(CountingFactory::default());
        let mut builder = TestJobHost::builder()
            .function_set::<SampleFunctions>()
            .host_factory(Arc::clone(&factory) as Arc<dyn HostFactory>);
        if let Some(services) = services {
            builder = builder.services(services);
        }
        let host = builder.build();

        let err = host.start().await.unwrap_err();
        assert!(matches!(err, HarnessError::Configuration(_)));
        assert_eq!(err.to_string(), "No services are configured for test job host");
        assert_eq!(factory.builds.load(Ordering::SeqCst), 0);
        assert_eq!(host.state().await, HostState::Unstarted);
    }
}

#[tokio::test]
async fn canceled_shutdown_is_not_an_error() {
    let (host, probe) = fake_host(canceled);
    host.start().await.unwrap();

    host.stop().await.unwrap();

    assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
    assert!(probe.dropped.load(Ordering::SeqCst));
    assert_eq!(host.state().await, HostState::Stopped);
}

#[tokio::test]
async fn other_shutdown_errors_still_release_the_host() {
    let (host, probe) = fake_host(|| HostError::NotStarted);
    host.start().await.unwrap();

    let err = host.stop().await.unwrap_err();
    assert!(matches!(err, HarnessError::Host(HostError::NotStarted)));
    assert!(probe.dropped.load(Ordering::SeqCst));
    assert_eq!(host.state().await, HostState::Stopped);

    host.stop().await.unwrap();
    assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stopped_hosts_do_not_restart() {
    let (host, _) = fake_host(canceled);
    host.start().await.unwrap();
    host.stop().await.unwrap();

    assert!(matches!(host.start().await, Err(HarnessError::Stopped)));
    assert!(matches!(
        host.await_orchestration("1000").await,
        Err(HarnessError::Stopped)
    ));
}

#[tokio::test]
async fn dispose_stops_exactly_once() {
    let (host, probe) = fake_host(canceled);
    host.start().await.unwrap();

    host.dispose().await.unwrap();
    host.dispose().await.unwrap();
    drop(host);

    assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
    assert!(!probe.shutdown_now.load(Ordering::SeqCst));
}

#[tokio::test]
async fn dropping_a_running_host_shuts_it_down() {
    let (host, probe) = fake_host(canceled);
    host.start().await.unwrap();

    drop(host);

    assert!(probe.shutdown_now.load(Ordering::SeqCst));
    assert!(probe.dropped.load(Ordering::SeqCst));
    assert_eq!(probe.stops.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn invoke_starts_the_host_when_auto_start_is_on() {
    let request = create_http_request("get", "https://fakehost.com/api?id=1", None, None).unwrap();
    let arguments = || FunctionArguments::new().with("req", request.clone());
    let trigger = FunctionRef::of::<SampleFunctions>("HttpTriggerFunction");

    let factory = Arc::new(CountingFactory::default());
    let (builder, _) = sample_builder();
    let host = builder
        .host_factory(Arc::clone(&factory) as Arc<dyn HostFactory>)
        .build();
    host.invoke(&trigger, arguments()).await.unwrap();
    assert_eq!(host.state().await, HostState::Running);
    assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
    host.dispose().await.unwrap();

    let (builder, _) = sample_builder();
    let manual = builder
        .options(common::sample_options().with_auto_start(false))
        .build();
    assert!(matches!(
        manual.invoke(&trigger, arguments()).await,
        Err(HarnessError::NotStarted)
    ));
    assert_eq!(manual.state().await, HostState::Unstarted);
}

#[tokio::test]
async fn failed_start_is_terminal() {
    let provider = Arc::new(TestLoggerProvider::new());
    let (builder, _) = sample_builder();
    let host = builder
        .options(TestHostOptions::default())
        .logger_provider(Arc::clone(&provider))
        .build();

    let err = host.start().await.unwrap_err();
    assert!(matches!(err, HarnessError::Host(HostError::Resolve { .. })));
    assert_eq!(host.state().await, HostState::Stopped);
    assert!(provider.logger_by_category("Host.Startup").is_some());
    host.dispose().await.unwrap();
}
