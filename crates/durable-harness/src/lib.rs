//! Test harness for durable function apps.
//!
//! Provides:
//! - `TestJobHost` - Start an in-process job host, invoke triggers, await orchestrations
//! - `TestHostOptions` - Hub name, storage settings, timeouts and tracking mode
//! - `init_tracing` - Console logging for test binaries
//!
//! The host, message and log capture crates are re-exported so a test
//! suite only needs this one dependency.

pub mod debugger;
pub mod error;
pub mod options;
pub mod wrapper;

pub use durable_harness_core;
pub use durable_harness_host;
pub use durable_harness_messages;
pub use error::HarnessError;
pub use options::{OrchestrationTracking, STORAGE_SETTING, TestHostOptions};
pub use wrapper::{HostState, TestJobHost, TestJobHostBuilder};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a console subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init();
}
