//! Pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::trigger::TriggerMode;

/// A notifier to build from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifierSpec {
    /// Unique registration name.
    pub name: String,
    /// Notifier type, resolved through the factory table.
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific options.
    #[serde(default)]
    pub options: Value,
}

impl NotifierSpec {
    /// Creates a spec with no options.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            options: Value::Null,
        }
    }

    /// Sets the options mapping.
    #[must_use]
    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }
}

/// Configuration for the notification pipeline.
///
/// Fixed once the pipeline is built; every field has a default so partial
/// documents deserialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Failure kinds that are never notified.
    pub ignore_failures: Vec<String>,
    /// Whether identical failures are grouped.
    pub error_grouping: bool,
    /// Length of the dedup window, in seconds when serialized.
    #[serde(with = "duration_secs")]
    pub error_grouping_period: Duration,
    /// Which grouped occurrences notify.
    pub notification_trigger: TriggerMode,
    /// User-agent patterns identifying crawlers.
    pub ignore_crawlers: Vec<String>,
    /// Leave `X-Cascade: pass` responses alone.
    pub ignore_cascade_pass: bool,
    /// Capture panics from the wrapped service.
    pub catch_panics: bool,
    /// Notifiers to build through the factory table.
    pub notifiers: Vec<NotifierSpec>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            ignore_failures: Vec::new(),
            error_grouping: false,
            error_grouping_period: Duration::from_secs(300), // 5 minutes
            notification_trigger: TriggerMode::default(),
            ignore_crawlers: Vec::new(),
            ignore_cascade_pass: true,
            catch_panics: true,
            notifiers: Vec::new(),
        }
    }
}

impl NotifierConfig {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> NotifierConfigBuilder {
        NotifierConfigBuilder::default()
    }

    /// Parses a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns `FaultlineError::SerializationError` on malformed input,
    /// including unsupported trigger names.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parses a configuration from an already decoded value.
    ///
    /// # Errors
    ///
    /// Returns `FaultlineError::SerializationError` on malformed input.
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Builder for `NotifierConfig`.
#[derive(Debug, Clone, Default)]
pub struct NotifierConfigBuilder {
    config: NotifierConfig,
}

impl NotifierConfigBuilder {
    /// Add a failure kind to ignore.
    #[must_use]
    pub fn ignore_failure(mut self, kind: impl Into<String>) -> Self {
        self.config.ignore_failures.push(kind.into());
        self
    }

    /// Enable grouping with the given window.
    #[must_use]
    pub const fn error_grouping(mut self, period: Duration) -> Self {
        self.config.error_grouping = true;
        self.config.error_grouping_period = period;
        self
    }

    /// Set the trigger mode.
    #[must_use]
    pub const fn notification_trigger(mut self, mode: TriggerMode) -> Self {
        self.config.notification_trigger = mode;
        self
    }

    /// Add a crawler user-agent pattern.
    #[must_use]
    pub fn ignore_crawler(mut self, pattern: impl Into<String>) -> Self {
        self.config.ignore_crawlers.push(pattern.into());
        self
    }

    /// Set whether cascade-pass responses are left alone.
    #[must_use]
    pub const fn ignore_cascade_pass(mut self, ignore: bool) -> Self {
        self.config.ignore_cascade_pass = ignore;
        self
    }

    /// Set whether panics are captured.
    #[must_use]
    pub const fn catch_panics(mut self, catch: bool) -> Self {
        self.config.catch_panics = catch;
        self
    }

    /// Add a notifier to build from the factory table.
    #[must_use]
    pub fn notifier(mut self, spec: NotifierSpec) -> Self {
        self.config.notifiers.push(spec);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> NotifierConfig {
        self.config
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(period: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(period.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}
