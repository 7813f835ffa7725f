//! The notification pipeline: ignore, group, dispatch.
//!
//! [`ExceptionNotifier`] is assembled once from a [`NotifierConfig`] and then
//! shared (usually behind an `Arc`) by everything that observes failures.
//! Building it is where configuration errors surface; after that it is
//! read-only apart from the grouping cache it owns a handle to.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::NotifierConfig;
use crate::context::RequestContext;
use crate::error::{FaultlineError, NotifierError, Result};
use crate::failure::{Failure, FailureMatcher};
use crate::grouping::{GroupingCache, GroupingKey};
use crate::ignore::{CrawlerMatcher, IgnoreChain, IgnorePredicate, IgnoreReason};
use crate::notifier::Notifier;
use crate::registry::{DispatchSummary, NotifierFactories, NotifierRegistry};
use crate::trigger::{NotificationTrigger, TriggerDecision};

/// What the pipeline did with a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// An ignore rule matched; nothing else ran.
    Ignored {
        /// The rule that matched.
        reason: IgnoreReason,
    },
    /// Grouping decided against notifying this occurrence.
    Suppressed {
        /// The failure's grouping key.
        key: GroupingKey,
        /// Occurrences in the current window, this one included.
        occurrences: u64,
    },
    /// Notifiers ran.
    Dispatched(DispatchSummary),
}

impl NotifyOutcome {
    /// Returns true if at least one notifier confirmed delivery.
    #[must_use]
    pub fn delivered(&self) -> bool {
        self.summary().is_some_and(DispatchSummary::delivered)
    }

    /// Returns true if an ignore rule matched.
    #[must_use]
    pub const fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored { .. })
    }

    /// Returns true if grouping suppressed the notification.
    #[must_use]
    pub const fn is_suppressed(&self) -> bool {
        matches!(self, Self::Suppressed { .. })
    }

    /// Returns the dispatch summary if notifiers ran.
    #[must_use]
    pub const fn summary(&self) -> Option<&DispatchSummary> {
        match self {
            Self::Dispatched(summary) => Some(summary),
            _ => None,
        }
    }
}

/// The assembled notification pipeline.
#[derive(Debug)]
pub struct ExceptionNotifier {
    ignore: IgnoreChain,
    trigger: NotificationTrigger,
    registry: NotifierRegistry,
    ignore_cascade_pass: bool,
    catch_panics: bool,
}

impl ExceptionNotifier {
    /// Starts building a pipeline from a configuration.
    #[must_use]
    pub fn builder(config: NotifierConfig) -> ExceptionNotifierBuilder {
        ExceptionNotifierBuilder::new(config)
    }

    /// Runs the failure through the pipeline.
    ///
    /// Marks the context delivered when a notifier confirms delivery.
    pub fn notify(&self, failure: &Failure<'_>, context: &mut RequestContext) -> NotifyOutcome {
        self.notify_at(failure, context, Utc::now())
    }

    /// Like [`notify`](Self::notify) with an explicit clock reading.
    pub fn notify_at(
        &self,
        failure: &Failure<'_>,
        context: &mut RequestContext,
        now: DateTime<Utc>,
    ) -> NotifyOutcome {
        if let Some(reason) = self.ignore.check(failure, context) {
            debug!(kind = %failure.kind(), reason = %reason, "failure ignored");
            return NotifyOutcome::Ignored { reason };
        }

        match self.trigger.evaluate(failure, now) {
            TriggerDecision {
                notify: false,
                key: Some(key),
                occurrences,
            } => {
                debug!(kind = %failure.kind(), key = %key, occurrences, "notification suppressed by grouping");
                NotifyOutcome::Suppressed { key, occurrences }
            }
            decision => {
                let summary = self.registry.dispatch_all(failure, context);
                if summary.delivered() {
                    context.mark_delivered();
                }

                info!(
                    kind = %failure.kind(),
                    source = %failure.source(),
                    occurrences = decision.occurrences,
                    attempted = summary.attempted(),
                    delivered = summary.delivered(),
                    "failure dispatched"
                );
                NotifyOutcome::Dispatched(summary)
            }
        }
    }

    /// Returns true if `X-Cascade: pass` responses are left alone.
    #[must_use]
    pub const fn ignore_cascade_pass(&self) -> bool {
        self.ignore_cascade_pass
    }

    /// Returns true if panics from the wrapped service are captured.
    #[must_use]
    pub const fn catch_panics(&self) -> bool {
        self.catch_panics
    }

    /// Returns the notifier registry.
    #[must_use]
    pub const fn registry(&self) -> &NotifierRegistry {
        &self.registry
    }

    /// Returns the ignore chain.
    #[must_use]
    pub const fn ignore_chain(&self) -> &IgnoreChain {
        &self.ignore
    }

    /// Returns the trigger.
    #[must_use]
    pub const fn trigger(&self) -> &NotificationTrigger {
        &self.trigger
    }
}

/// Builder for [`ExceptionNotifier`].
pub struct ExceptionNotifierBuilder {
    config: NotifierConfig,
    cache: Option<Arc<dyn GroupingCache>>,
    matchers: Vec<FailureMatcher>,
    predicates: Vec<(String, IgnorePredicate)>,
    notifiers: Vec<(String, Arc<dyn Notifier>)>,
    factories: NotifierFactories,
}

impl ExceptionNotifierBuilder {
    fn new(config: NotifierConfig) -> Self {
        Self {
            config,
            cache: None,
            matchers: Vec::new(),
            predicates: Vec::new(),
            notifiers: Vec::new(),
            factories: NotifierFactories::with_builtins(),
        }
    }

    /// Sets the grouping cache. Required when grouping is enabled.
    #[must_use]
    pub fn grouping_cache(mut self, cache: Arc<dyn GroupingCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Adds a typed or named failure matcher to the ignore list.
    #[must_use]
    pub fn ignore_failure(mut self, matcher: FailureMatcher) -> Self {
        self.matchers.push(matcher);
        self
    }

    /// Adds a custom ignore predicate. Predicates run in the order added.
    #[must_use]
    pub fn ignore_if<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Failure<'_>, &RequestContext) -> bool + Send + Sync + 'static,
    {
        self.predicates.push((name.into(), Arc::new(predicate)));
        self
    }

    /// Registers a notifier instance.
    #[must_use]
    pub fn notifier(mut self, name: impl Into<String>, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push((name.into(), notifier));
        self
    }

    /// Adds a factory for a notifier type named in the configuration.
    #[must_use]
    pub fn factory<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<Arc<dyn Notifier>, NotifierError> + Send + Sync + 'static,
    {
        self.factories.register_factory(kind, factory);
        self
    }

    /// Validates the configuration and assembles the pipeline.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid crawler pattern, an
    /// unusable grouping period, a missing grouping cache, an unknown
    /// notifier type, rejected notifier options, or a duplicate notifier name.
    pub fn build(self) -> Result<ExceptionNotifier> {
        let Self {
            config,
            cache,
            matchers,
            predicates,
            notifiers,
            factories,
        } = self;

        let mut ignore = IgnoreChain::new();
        for kind in &config.ignore_failures {
            ignore.push_matcher(FailureMatcher::kind(kind.as_str()));
        }
        for matcher in matchers {
            ignore.push_matcher(matcher);
        }
        for (name, predicate) in predicates {
            ignore.push_shared_predicate(name, predicate);
        }
        if !config.ignore_crawlers.is_empty() {
            ignore.push_crawlers(CrawlerMatcher::new(&config.ignore_crawlers)?);
        }

        let trigger = if config.error_grouping {
            let window = grouping_window(&config)?;
            let cache = cache.ok_or(FaultlineError::MissingGroupingCache)?;
            NotificationTrigger::grouped(cache, window, config.notification_trigger)
        } else {
            if cache.is_some() {
                debug!("grouping cache supplied but error grouping is disabled");
            }
            NotificationTrigger::Always
        };

        let mut registry = NotifierRegistry::new();
        for spec in &config.notifiers {
            let notifier = factories.build(&spec.name, &spec.kind, &spec.options)?;
            registry.register(spec.name.clone(), notifier)?;
        }
        for (name, notifier) in notifiers {
            registry.register(name, notifier)?;
        }

        info!(
            notifiers = registry.len(),
            ignore_rules = ignore.matcher_count() + ignore.predicate_count(),
            grouping = trigger.is_grouped(),
            trigger = %config.notification_trigger,
            "exception notifier ready"
        );

        Ok(ExceptionNotifier {
            ignore,
            trigger,
            registry,
            ignore_cascade_pass: config.ignore_cascade_pass,
            catch_panics: config.catch_panics,
        })
    }
}

fn grouping_window(config: &NotifierConfig) -> Result<TimeDelta> {
    if config.error_grouping_period.is_zero() {
        return Err(FaultlineError::InvalidGroupingPeriod {
            reason: "period must be greater than zero".to_string(),
        });
    }

    let window = TimeDelta::from_std(config.error_grouping_period).map_err(|e| FaultlineError::InvalidGroupingPeriod {
        reason: e.to_string(),
    })?;

    if Utc::now().checked_add_signed(window).is_none() {
        return Err(FaultlineError::InvalidGroupingPeriod {
            reason: "period overflows the clock".to_string(),
        });
    }

    Ok(window)
}

impl fmt::Debug for ExceptionNotifierBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionNotifierBuilder")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("matchers", &self.matchers)
            .field(
                "predicates",
                &self.predicates.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(),
            )
            .field("notifiers", &self.notifiers)
            .field("factories", &self.factories)
            .finish()
    }
}
