//! Named notifier registrations and isolated fan-out.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::context::RequestContext;
use crate::error::{FaultlineError, NotifierError, Result};
use crate::failure::Failure;
use crate::notifier::{Delivery, LogNotifier, Notifier};

/// Builds a notifier from its options mapping.
pub type NotifierFactory = Arc<dyn Fn(&Value) -> std::result::Result<Arc<dyn Notifier>, NotifierError> + Send + Sync>;

/// How one notifier fared during a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// The notifier confirmed delivery.
    Delivered,
    /// The notifier ran but could not confirm delivery.
    Unconfirmed(Option<String>),
    /// The notifier returned an error or panicked.
    Failed(String),
    /// The notifier is disabled.
    Skipped,
}

impl DeliveryStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Unconfirmed(_) => "unconfirmed",
            Self::Failed(_) => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a single notifier invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierResult {
    /// Registration name of the notifier.
    pub name: String,
    /// What happened.
    pub status: DeliveryStatus,
}

/// The outcome of dispatching one failure to every notifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Per-notifier results in registration order.
    pub results: Vec<NotifierResult>,
}

impl DispatchSummary {
    /// Returns true if at least one notifier confirmed delivery.
    #[must_use]
    pub fn delivered(&self) -> bool {
        self.results
            .iter()
            .any(|r| r.status == DeliveryStatus::Delivered)
    }

    /// Number of notifiers that were actually invoked.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status != DeliveryStatus::Skipped)
            .count()
    }

    /// Results of the notifiers that failed.
    pub fn failures(&self) -> impl Iterator<Item = &NotifierResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.status, DeliveryStatus::Failed(_)))
    }

    /// Returns the result for a notifier by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&NotifierResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

#[derive(Debug, Clone)]
struct Registration {
    name: String,
    notifier: Arc<dyn Notifier>,
}

/// Notifiers keyed by a unique name, in registration order.
#[derive(Debug, Clone, Default)]
pub struct NotifierRegistry {
    registrations: Vec<Registration>,
}

impl NotifierRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a notifier under a name.
    ///
    /// # Errors
    ///
    /// Returns `FaultlineError::DuplicateNotifier` if the name is taken.
    pub fn register(&mut self, name: impl Into<String>, notifier: Arc<dyn Notifier>) -> Result<()> {
        let name = name.into();
        if self.contains(&name) {
            return Err(FaultlineError::DuplicateNotifier { name });
        }

        info!(notifier = %name, backend = %notifier.name(), "registered notifier");
        self.registrations.push(Registration { name, notifier });
        Ok(())
    }

    /// Returns true if a notifier is registered under the name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.registrations.iter().any(|r| r.name == name)
    }

    /// Returns the notifier registered under the name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Notifier>> {
        self.registrations
            .iter()
            .find(|r| r.name == name)
            .map(|r| Arc::clone(&r.notifier))
    }

    /// Registration names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.registrations.iter().map(|r| r.name.as_str()).collect()
    }

    /// Returns the number of registered notifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Delivers the failure to every enabled notifier.
    ///
    /// Errors, unconfirmed deliveries and panics are logged and recorded;
    /// none of them stops the remaining notifiers.
    pub fn dispatch_all(&self, failure: &Failure<'_>, context: &RequestContext) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        for registration in &self.registrations {
            let name = registration.name.as_str();
            let notifier = &registration.notifier;

            if !notifier.is_enabled() {
                debug!(notifier = %name, "notifier disabled, skipping");
                summary.results.push(NotifierResult {
                    name: name.to_string(),
                    status: DeliveryStatus::Skipped,
                });
                continue;
            }

            let attempt = panic::catch_unwind(AssertUnwindSafe(|| notifier.deliver(failure, context)));

            let status = match attempt {
                Ok(Ok(Delivery { confirmed: true, .. })) => {
                    debug!(notifier = %name, kind = %failure.kind(), "notification delivered");
                    DeliveryStatus::Delivered
                }
                Ok(Ok(Delivery { message, .. })) => {
                    warn!(notifier = %name, message = ?message, "notification not confirmed");
                    DeliveryStatus::Unconfirmed(message)
                }
                Ok(Err(e)) => {
                    warn!(notifier = %name, error = %e, "notification error");
                    DeliveryStatus::Failed(e.to_string())
                }
                Err(payload) => {
                    let e = NotifierError::Panicked {
                        message: panic_message(payload.as_ref()),
                    };
                    warn!(notifier = %name, error = %e, "notifier panicked");
                    DeliveryStatus::Failed(e.to_string())
                }
            };

            summary.results.push(NotifierResult {
                name: name.to_string(),
                status,
            });
        }

        summary
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string payload".to_string())
}

/// Notifier factories keyed by type name.
///
/// Configuration names a notifier type per registration; the factory for that
/// type turns the registration's options into a notifier.
#[derive(Clone, Default)]
pub struct NotifierFactories {
    factories: HashMap<String, NotifierFactory>,
}

impl NotifierFactories {
    /// Creates an empty factory table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a factory table with the built-in `log` type.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut factories = Self::new();
        factories.register_factory("log", |options| {
            let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier::from_options(options)?);
            Ok(notifier)
        });
        factories
    }

    /// Registers or replaces the factory for a type.
    pub fn register_factory<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> std::result::Result<Arc<dyn Notifier>, NotifierError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    /// Returns true if a factory exists for the type.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Builds the notifier for a registration.
    ///
    /// # Errors
    ///
    /// Returns `FaultlineError::UnknownNotifierType` when no factory exists for
    /// `kind`, and `FaultlineError::InvalidNotifierOptions` when the factory
    /// rejects the options.
    pub fn build(&self, name: &str, kind: &str, options: &Value) -> Result<Arc<dyn Notifier>> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| FaultlineError::UnknownNotifierType {
                name: name.to_string(),
                kind: kind.to_string(),
            })?;

        factory(options).map_err(|e| FaultlineError::InvalidNotifierOptions {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Debug for NotifierFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("NotifierFactories")
            .field("kinds", &kinds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::FnNotifier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(label: &str, calls: &Arc<AtomicUsize>) -> Arc<dyn Notifier> {
        let counter = Arc::clone(calls);
        Arc::new(FnNotifier::new(label, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Delivery::confirmed())
        }))
    }

    fn failing(reason: &'static str) -> Arc<dyn Notifier> {
        Arc::new(FnNotifier::new("failing", move |_, _| Err(NotifierError::delivery(reason))))
    }

    mod registry_tests {
        use super::*;

        #[test]
        fn register_and_lookup() {
            let calls = Arc::new(AtomicUsize::new(0));
            let mut registry = NotifierRegistry::new();
            registry.register("email", counting("email", &calls)).unwrap();
            registry.register("chat", counting("chat", &calls)).unwrap();

            assert_eq!(registry.len(), 2);
            assert_eq!(registry.names(), vec!["email", "chat"]);
            assert!(registry.get("email").is_some());
            assert!(registry.get("pager").is_none());
        }

        #[test]
        fn duplicate_name_rejected() {
            let calls = Arc::new(AtomicUsize::new(0));
            let mut registry = NotifierRegistry::new();
            registry.register("email", counting("a", &calls)).unwrap();

            let err = registry.register("email", counting("b", &calls)).unwrap_err();
            assert!(matches!(err, FaultlineError::DuplicateNotifier { name } if name == "email"));
            assert_eq!(registry.len(), 1);
        }

        #[test]
        fn empty_registry_dispatches_nothing() {
            let registry = NotifierRegistry::new();
            let summary = registry.dispatch_all(&Failure::cascade_pass(), &RequestContext::background());

            assert!(registry.is_empty());
            assert_eq!(summary.attempted(), 0);
            assert!(!summary.delivered());
        }
    }

    mod dispatch_tests {
        use super::*;

        #[test]
        fn failing_notifier_does_not_stop_others() {
            let calls = Arc::new(AtomicUsize::new(0));
            let mut registry = NotifierRegistry::new();
            registry.register("broken", failing("smtp refused")).unwrap();
            registry.register("chat", counting("chat", &calls)).unwrap();

            let summary = registry.dispatch_all(&Failure::cascade_pass(), &RequestContext::background());

            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert!(summary.delivered());
            assert_eq!(summary.attempted(), 2);
            assert_eq!(summary.failures().count(), 1);
            assert_eq!(
                summary.get("broken").map(|r| &r.status),
                Some(&DeliveryStatus::Failed("delivery failed: smtp refused".to_string()))
            );
        }

        #[test]
        fn panicking_notifier_is_isolated() {
            let calls = Arc::new(AtomicUsize::new(0));
            let mut registry = NotifierRegistry::new();
            registry
                .register("panics", Arc::new(FnNotifier::new("panics", |_, _| panic!("template missing"))))
                .unwrap();
            registry.register("chat", counting("chat", &calls)).unwrap();

            let summary = registry.dispatch_all(&Failure::cascade_pass(), &RequestContext::background());

            assert_eq!(calls.load(Ordering::SeqCst), 1);
            match &summary.results[0].status {
                DeliveryStatus::Failed(reason) => assert!(reason.contains("template missing")),
                other => panic!("unexpected status: {other}"),
            }
        }

        #[test]
        fn unconfirmed_is_not_delivered() {
            let mut registry = NotifierRegistry::new();
            registry
                .register(
                    "queue",
                    Arc::new(FnNotifier::new("queue", |_, _| Ok(Delivery::unconfirmed("no ack")))),
                )
                .unwrap();

            let summary = registry.dispatch_all(&Failure::cascade_pass(), &RequestContext::background());

            assert!(!summary.delivered());
            assert_eq!(
                summary.results[0].status,
                DeliveryStatus::Unconfirmed(Some("no ack".to_string()))
            );
        }

        #[test]
        fn disabled_notifier_skipped() {
            let mut registry = NotifierRegistry::new();
            registry
                .register(
                    "off",
                    Arc::new(FnNotifier::new("off", |_, _| Ok(Delivery::confirmed())).enabled(false)),
                )
                .unwrap();

            let summary = registry.dispatch_all(&Failure::cascade_pass(), &RequestContext::background());

            assert_eq!(summary.results[0].status, DeliveryStatus::Skipped);
            assert_eq!(summary.attempted(), 0);
        }

        #[test]
        fn dispatch_in_registration_order() {
            let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
            let mut registry = NotifierRegistry::new();
            for name in ["first", "second", "third"] {
                let order = Arc::clone(&order);
                registry
                    .register(
                        name,
                        Arc::new(FnNotifier::new(name, move |_, _| {
                            order.lock().push(name);
                            Ok(Delivery::confirmed())
                        })),
                    )
                    .unwrap();
            }

            registry.dispatch_all(&Failure::cascade_pass(), &RequestContext::background());

            assert_eq!(*order.lock(), vec!["first", "second", "third"]);
        }
    }

    mod factory_tests {
        use super::*;
        use serde_json::json;

        #[test]
        fn builtin_log_factory() {
            let factories = NotifierFactories::with_builtins();
            let notifier = factories.build("ops-log", "log", &json!({})).unwrap();

            assert!(factories.contains("log"));
            assert_eq!(notifier.name(), "log");
        }

        #[test]
        fn unknown_type() {
            let factories = NotifierFactories::with_builtins();
            let err = factories.build("pager", "pagerduty", &Value::Null).unwrap_err();

            assert!(matches!(
                err,
                FaultlineError::UnknownNotifierType { name, kind } if name == "pager" && kind == "pagerduty"
            ));
        }

        #[test]
        fn invalid_options() {
            let factories = NotifierFactories::with_builtins();
            let err = factories
                .build("ops-log", "log", &json!({ "enabled": "yes" }))
                .unwrap_err();

            assert!(matches!(err, FaultlineError::InvalidNotifierOptions { name, .. } if name == "ops-log"));
        }

        #[test]
        fn custom_factory_reads_options() {
            let mut factories = NotifierFactories::new();
            factories.register_factory("webhook", |options| {
                let url = options
                    .get("url")
                    .and_then(Value::as_str)
                    .ok_or_else(|| NotifierError::InvalidOptions {
                        reason: "missing url".to_string(),
                    })?
                    .to_string();
                let notifier: Arc<dyn Notifier> = Arc::new(FnNotifier::new(url, |_, _| Ok(Delivery::confirmed())));
                Ok(notifier)
            });

            let notifier = factories
                .build("hooks", "webhook", &json!({ "url": "https://hooks.example.com/x" }))
                .unwrap();
            assert_eq!(notifier.name(), "https://hooks.example.com/x");

            assert!(factories.build("hooks", "webhook", &json!({})).is_err());
            assert!(format!("{factories:?}").contains("webhook"));
        }
    }
}
