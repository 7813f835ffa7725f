//! Error types for the faultline crate.

use thiserror::Error;

/// Errors raised while assembling the notification pipeline.
///
/// All of these surface from [`ExceptionNotifierBuilder::build`](crate::ExceptionNotifierBuilder::build)
/// so a misconfigured deployment fails before it serves a single request.
#[derive(Debug, Error)]
pub enum FaultlineError {
    /// A notifier with the same name was already registered.
    #[error("notifier already registered: {name}")]
    DuplicateNotifier {
        /// The name that was registered twice.
        name: String,
    },

    /// The configured notification trigger mode is not supported.
    #[error("unsupported notification trigger: {mode}")]
    UnsupportedTrigger {
        /// The mode as written in the configuration.
        mode: String,
    },

    /// A crawler user-agent pattern failed to compile.
    #[error("invalid crawler pattern '{pattern}': {reason}")]
    InvalidCrawlerPattern {
        /// The offending pattern.
        pattern: String,
        /// The compiler's explanation.
        reason: String,
    },

    /// No factory is registered for the notifier type named in the configuration.
    #[error("unknown notifier type '{kind}' for notifier {name}")]
    UnknownNotifierType {
        /// The notifier registration name.
        name: String,
        /// The requested notifier type.
        kind: String,
    },

    /// A notifier factory rejected its options.
    #[error("invalid options for notifier {name}: {reason}")]
    InvalidNotifierOptions {
        /// The notifier registration name.
        name: String,
        /// Why the options were rejected.
        reason: String,
    },

    /// The grouping period cannot be used as a dedup window.
    #[error("invalid grouping period: {reason}")]
    InvalidGroupingPeriod {
        /// Why the period was rejected.
        reason: String,
    },

    /// Grouping is enabled but no cache implementation was supplied.
    #[error("error grouping is enabled but no grouping cache was provided")]
    MissingGroupingCache,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for FaultlineError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type for faultline operations.
pub type Result<T> = std::result::Result<T, FaultlineError>;

/// Errors reported by a notifier while delivering a failure.
///
/// These never leave the registry: they are logged and recorded in the
/// [`DispatchSummary`](crate::DispatchSummary).
#[derive(Debug, Error)]
pub enum NotifierError {
    /// The backend could not deliver the notification.
    #[error("delivery failed: {reason}")]
    DeliveryFailed {
        /// The reason delivery failed.
        reason: String,
    },

    /// The notifier panicked while delivering.
    #[error("notifier panicked: {message}")]
    Panicked {
        /// The panic payload, when it was a string.
        message: String,
    },

    /// The notifier options could not be parsed.
    #[error("invalid options: {reason}")]
    InvalidOptions {
        /// Why the options were rejected.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl NotifierError {
    /// Shorthand for a [`NotifierError::DeliveryFailed`].
    #[must_use]
    pub fn delivery(reason: impl Into<String>) -> Self {
        Self::DeliveryFailed {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for NotifierError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
