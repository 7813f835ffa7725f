//! Notifier backends.
//!
//! This module provides the [`Notifier`] trait every backend implements and
//! two built-in backends: [`LogNotifier`] and the closure-backed [`FnNotifier`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::context::RequestContext;
use crate::error::NotifierError;
use crate::failure::Failure;
use crate::report::FailureReport;

/// What a notifier reports back after an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Whether the backend confirmed the notification went out.
    pub confirmed: bool,
    /// Optional message from the backend.
    pub message: Option<String>,
}

impl Delivery {
    /// A confirmed delivery.
    #[must_use]
    pub const fn confirmed() -> Self {
        Self {
            confirmed: true,
            message: None,
        }
    }

    /// An attempt the backend could not confirm.
    #[must_use]
    pub fn unconfirmed(message: impl Into<String>) -> Self {
        Self {
            confirmed: false,
            message: Some(message.into()),
        }
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }
}

/// A backend capable of delivering an alert for a failure.
///
/// Delivery runs synchronously on the request path. Backends that talk to the
/// network own their timeouts.
pub trait Notifier: Send + Sync + fmt::Debug {
    /// Returns the backend name.
    fn name(&self) -> &str;

    /// Delivers a notification for the failure.
    ///
    /// # Errors
    ///
    /// Returns a [`NotifierError`] if the backend fails. The registry logs it
    /// and moves on to the next notifier.
    fn deliver(&self, failure: &Failure<'_>, context: &RequestContext) -> Result<Delivery, NotifierError>;

    /// Returns true if this notifier is enabled.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Options accepted by the `log` notifier type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogOptions {
    /// Whether the notifier is enabled.
    pub enabled: bool,
    /// Whether to include request headers in the event.
    pub include_headers: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            include_headers: false,
        }
    }
}

/// A notifier that emits failures as `tracing` error events.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    options: LogOptions,
}

impl LogNotifier {
    /// Creates a log notifier with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a log notifier from options.
    #[must_use]
    pub const fn with_options(options: LogOptions) -> Self {
        Self { options }
    }

    /// Builds a log notifier from a JSON options mapping.
    ///
    /// # Errors
    ///
    /// Returns `NotifierError::InvalidOptions` for unknown or mistyped fields.
    pub fn from_options(options: &serde_json::Value) -> Result<Self, NotifierError> {
        let options = if options.is_null() {
            LogOptions::default()
        } else {
            LogOptions::deserialize(options).map_err(|e| NotifierError::InvalidOptions {
                reason: e.to_string(),
            })?
        };
        Ok(Self::with_options(options))
    }

    /// Returns the options.
    #[must_use]
    pub const fn options(&self) -> &LogOptions {
        &self.options
    }
}

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn deliver(&self, failure: &Failure<'_>, context: &RequestContext) -> Result<Delivery, NotifierError> {
        let report = FailureReport::capture(failure, context);

        let headers = self
            .options
            .include_headers
            .then(|| context.request().map(|r| format!("{:?}", r.headers())))
            .flatten();

        error!(
            incident_id = %report.incident_id,
            source = %report.source,
            kind = %report.kind,
            error_message = %report.message,
            causes = ?report.causes,
            grouping_key = %report.grouping_key,
            method = ?report.method,
            uri = ?report.uri,
            headers = ?headers,
            "FAILURE"
        );

        Ok(Delivery::confirmed().with_message("logged to tracing"))
    }

    fn is_enabled(&self) -> bool {
        self.options.enabled
    }
}

type DeliverFn = dyn Fn(&Failure<'_>, &RequestContext) -> Result<Delivery, NotifierError> + Send + Sync;

/// A notifier backed by a closure.
///
/// Handy for wiring a backend that already has its own client, and for tests.
#[derive(Clone)]
pub struct FnNotifier {
    label: String,
    deliver: Arc<DeliverFn>,
    enabled: bool,
}

impl FnNotifier {
    /// Wraps a delivery closure.
    pub fn new<F>(label: impl Into<String>, deliver: F) -> Self
    where
        F: Fn(&Failure<'_>, &RequestContext) -> Result<Delivery, NotifierError> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            deliver: Arc::new(deliver),
            enabled: true,
        }
    }

    /// Sets whether the notifier is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Returns the label given at construction.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for FnNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnNotifier")
            .field("label", &self.label)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl Notifier for FnNotifier {
    fn name(&self) -> &str {
        &self.label
    }

    fn deliver(&self, failure: &Failure<'_>, context: &RequestContext) -> Result<Delivery, NotifierError> {
        debug!(notifier = %self.label, kind = %failure.kind(), "invoking closure notifier");
        (self.deliver)(failure, context)
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    mod delivery_tests {
        use super::*;

        #[test]
        fn confirmed_delivery() {
            let delivery = Delivery::confirmed();
            assert!(delivery.confirmed);
            assert!(delivery.message.is_none());
        }

        #[test]
        fn unconfirmed_delivery() {
            let delivery = Delivery::unconfirmed("queued, no ack");
            assert!(!delivery.confirmed);
            assert_eq!(delivery.message.as_deref(), Some("queued, no ack"));
        }

        #[test]
        fn with_message() {
            let delivery = Delivery::confirmed().with_message("sent");
            assert_eq!(delivery.message.as_deref(), Some("sent"));
        }
    }

    mod log_notifier_tests {
        use super::*;

        #[test]
        fn delivers_and_confirms() {
            let notifier = LogNotifier::new();
            let delivery = notifier
                .deliver(&Failure::cascade_pass(), &RequestContext::background())
                .unwrap();
            assert!(delivery.confirmed);
            assert!(notifier.is_enabled());
            assert_eq!(notifier.name(), "log");
        }

        #[test]
        fn delivers_with_request_headers() {
            let request = http::Request::get("/orders")
                .header("user-agent", "curl/8.0")
                .body(())
                .unwrap();
            let notifier = LogNotifier::with_options(LogOptions {
                enabled: true,
                include_headers: true,
            });

            let delivery = notifier
                .deliver(&Failure::cascade_pass(), &RequestContext::for_request(&request))
                .unwrap();
            assert!(delivery.confirmed);
        }

        #[test]
        fn from_null_options_uses_defaults() {
            let notifier = LogNotifier::from_options(&serde_json::Value::Null).unwrap();
            assert!(notifier.options().enabled);
            assert!(!notifier.options().include_headers);
        }

        #[test]
        fn from_options_reads_fields() {
            let notifier =
                LogNotifier::from_options(&serde_json::json!({ "enabled": false, "include_headers": true })).unwrap();
            assert!(!notifier.is_enabled());
            assert!(notifier.options().include_headers);
        }

        #[test]
        fn from_options_rejects_unknown_fields() {
            let err = LogNotifier::from_options(&serde_json::json!({ "colour": "red" })).unwrap_err();
            assert!(matches!(err, NotifierError::InvalidOptions { .. }));
        }
    }

    mod fn_notifier_tests {
        use super::*;

        #[test]
        fn invokes_closure() {
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&calls);
            let notifier = FnNotifier::new("counter", move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Delivery::confirmed())
            });

            notifier
                .deliver(&Failure::cascade_pass(), &RequestContext::background())
                .unwrap();
            notifier
                .deliver(&Failure::cascade_pass(), &RequestContext::background())
                .unwrap();

            assert_eq!(calls.load(Ordering::SeqCst), 2);
            assert_eq!(notifier.label(), "counter");
            assert_eq!(notifier.name(), "counter");
        }

        #[test]
        fn closure_sees_failure() {
            let notifier = FnNotifier::new("kind", |failure, _| {
                if failure.is_cascade_pass() {
                    Ok(Delivery::confirmed())
                } else {
                    Err(NotifierError::delivery("unexpected failure"))
                }
            });

            assert!(notifier
                .deliver(&Failure::cascade_pass(), &RequestContext::background())
                .is_ok());
        }

        #[test]
        fn disabled() {
            let notifier = FnNotifier::new("off", |_, _| Ok(Delivery::confirmed())).enabled(false);
            assert!(!notifier.is_enabled());
            assert!(format!("{notifier:?}").contains("off"));
        }
    }
}
