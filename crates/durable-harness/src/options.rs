//! Test host configuration.

use std::{collections::BTreeMap, fs, path::Path, time::Duration};

use durable_harness_host::HostSettings;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::HarnessError;

/// Setting name the storage connection string is published under.
pub const STORAGE_SETTING: &str = "AzureWebJobsStorage";

/// How `await_orchestration` results are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestrationTracking {
    /// Every lookup names its instance id.
    #[default]
    ById,
    /// The last awaited state is cached for
    /// [`TestJobHost::last_orchestration_state_with_history`](crate::TestJobHost::last_orchestration_state_with_history).
    TrackLast,
}

/// Options for a [`TestJobHost`](crate::TestJobHost).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TestHostOptions {
    pub hub_name: String,
    pub storage_connection_string: String,
    /// Published to the name resolver ahead of the environment.
    pub app_settings: BTreeMap<String, String>,
    #[serde(with = "secs")]
    pub orchestration_timeout: Duration,
    /// Used instead of `orchestration_timeout` while a debugger is attached.
    #[serde(with = "secs")]
    pub debugger_orchestration_timeout: Duration,
    #[serde(with = "secs")]
    pub shutdown_timeout: Duration,
    pub tracking: OrchestrationTracking,
    /// Start the host on the first `invoke` if `start` was never called.
    pub auto_start: bool,
    pub max_concurrent_orchestrator_functions: usize,
    pub max_concurrent_activity_functions: usize,
}

impl Default for TestHostOptions {
    fn default() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            hub_name: format!("TestHubV2{}", &suffix[..4]),
            storage_connection_string: "UseDevelopmentStorage=true".to_string(),
            app_settings: BTreeMap::new(),
            orchestration_timeout: Duration::from_secs(30),
            debugger_orchestration_timeout: Duration::from_secs(5 * 60),
            shutdown_timeout: Duration::from_secs(5),
            tracking: OrchestrationTracking::ById,
            auto_start: true,
            max_concurrent_orchestrator_functions: 200,
            max_concurrent_activity_functions: 200,
        }
    }
}

/// Shape of a `local.settings.json` file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LocalSettings {
    #[serde(default)]
    values: BTreeMap<String, serde_json::Value>,
}

impl TestHostOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with the `Values` section of a `local.settings.json`.
    ///
    /// `AzureWebJobsStorage` becomes the storage connection string; every
    /// value is also published as an app setting.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is not valid JSON.
    pub fn from_local_settings(path: impl AsRef<Path>) -> Result<Self, HarnessError> {
        let path = path.as_ref();
        let settings_error = |source| HarnessError::Settings {
            path: path.to_path_buf(),
            source,
        };
        let text = fs::read_to_string(path).map_err(|e| settings_error(serde_json::Error::io(e)))?;
        let local: LocalSettings = serde_json::from_str(&text).map_err(settings_error)?;

        let mut options = Self::default();
        for (name, value) in local.values {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            if name.eq_ignore_ascii_case(STORAGE_SETTING) {
                options.storage_connection_string.clone_from(&value);
            }
            options.app_settings.insert(name, value);
        }
        Ok(options)
    }

    #[must_use]
    pub fn with_hub_name(mut self, hub_name: impl Into<String>) -> Self {
        self.hub_name = hub_name.into();
        self
    }

    #[must_use]
    pub fn with_storage_connection_string(mut self, connection: impl Into<String>) -> Self {
        self.storage_connection_string = connection.into();
        self
    }

    #[must_use]
    pub fn with_app_setting(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.app_settings.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub const fn with_orchestration_timeout(mut self, timeout: Duration) -> Self {
        self.orchestration_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_debugger_orchestration_timeout(mut self, timeout: Duration) -> Self {
        self.debugger_orchestration_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_tracking(mut self, tracking: OrchestrationTracking) -> Self {
        self.tracking = tracking;
        self
    }

    #[must_use]
    pub const fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    #[must_use]
    pub const fn with_max_concurrent_orchestrator_functions(mut self, max: usize) -> Self {
        self.max_concurrent_orchestrator_functions = max;
        self
    }

    #[must_use]
    pub const fn with_max_concurrent_activity_functions(mut self, max: usize) -> Self {
        self.max_concurrent_activity_functions = max;
        self
    }

    /// Wait deadline for `await_orchestration`.
    #[must_use]
    pub const fn effective_orchestration_timeout(&self, debugger_attached: bool) -> Duration {
        if debugger_attached {
            self.debugger_orchestration_timeout
        } else {
            self.orchestration_timeout
        }
    }

    pub(crate) fn host_settings(&self) -> HostSettings {
        HostSettings {
            hub_name: self.hub_name.clone(),
            shutdown_timeout: self.shutdown_timeout,
            max_concurrent_orchestrator_functions: self.max_concurrent_orchestrator_functions,
            max_concurrent_activity_functions: self.max_concurrent_activity_functions,
        }
    }
}

/// Durations as (fractional) seconds.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_durable_test_host() {
        let options = TestHostOptions::default();
        assert!(options.hub_name.starts_with("TestHubV2"));
        assert_eq!(options.hub_name.len(), "TestHubV2".len() + 4);
        assert_eq!(options.storage_connection_string, "UseDevelopmentStorage=true");
        assert_eq!(options.orchestration_timeout, Duration::from_secs(30));
        assert_eq!(options.effective_orchestration_timeout(true), Duration::from_secs(300));
        assert_eq!(options.tracking, OrchestrationTracking::ById);
        assert!(options.auto_start);
        assert_ne!(options.hub_name, TestHostOptions::default().hub_name);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let options: TestHostOptions = serde_json::from_str(
            r#"{"orchestrationTimeout": 1.5, "tracking": "TrackLast", "autoStart": false}"#,
        )
        .unwrap();
        assert_eq!(options.orchestration_timeout, Duration::from_millis(1500));
        assert_eq!(options.tracking, OrchestrationTracking::TrackLast);
        assert!(!options.auto_start);
        assert_eq!(options.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn local_settings_values_become_app_settings() {
        let path = std::env::temp_dir().join(format!("local.settings.{}.json", Uuid::new_v4()));
        fs::write(
            &path,
            r#"{
                "IsEncrypted": false,
                "Values": {
                    "AzureWebJobsStorage": "DefaultEndpointsProtocol=https;AccountName=test",
                    "TOPIC_NAME": "orders",
                    "RetryCount": 3
                }
            }"#,
        )
        .unwrap();

        let options = TestHostOptions::from_local_settings(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(
            options.storage_connection_string,
            "DefaultEndpointsProtocol=https;AccountName=test"
        );
        assert_eq!(options.app_settings["TOPIC_NAME"], "orders");
        assert_eq!(options.app_settings["RetryCount"], "3");
    }

    #[test]
    fn missing_settings_file_is_reported() {
        let err = TestHostOptions::from_local_settings("/nonexistent/local.settings.json").unwrap_err();
        assert!(matches!(err, HarnessError::Settings { .. }));
    }
}
