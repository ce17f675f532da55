//! Core abstractions for durable function test harnesses.
//!
//! This crate provides the fundamental building blocks:
//! - `TestLoggerProvider` / `TestLogger` - Per-category log capture for assertions
//! - `LogRecord` - Captured log entry
//! - `CaptureLayer` - Routes `tracing` events into the log capture
//! - `ServiceCollection` - Minimal service container for function dependencies
//! - `NameResolver` - Setting lookup chain (defaults, injected resolver, environment)
//! - `DurabilityProvider` trait and orchestration state types

pub mod capture;
pub mod log_record;
pub mod log_sink;
pub mod name_resolver;
pub mod output;
pub mod services;
pub mod traits;

pub use capture::CaptureLayer;
pub use log_record::{EventId, LogError, LogLevel, LogRecord};
pub use log_sink::{LogFilter, TestLogger, TestLoggerProvider};
pub use name_resolver::{NameResolver, ResolveError, TestNameResolver};
pub use output::{ChannelOutput, ConsoleOutput, OutputClosed, TestOutput};
pub use services::{ServiceCollection, ServiceError, ServiceProvider};
pub use traits::{
    DurabilityProvider, OrchestrationInstance, OrchestrationQuery, OrchestrationState,
    OrchestrationStatus, ProviderError, QueryResult,
};
