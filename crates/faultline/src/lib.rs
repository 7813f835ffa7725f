//! Failure notification for HTTP services and background work.
//!
//! `faultline` decides which failures are worth telling someone about and
//! hands those to pluggable notifier backends.
//!
//! # Pipeline
//!
//! Every observed [`Failure`] goes through three stages:
//!
//! 1. **Ignore rules**: ignored failure kinds, then custom predicates, then
//!    crawler user agents. The first match drops the failure.
//! 2. **Grouping**: when enabled, identical failures inside one window share a
//!    [`GroupingKey`] and the [`TriggerMode`] decides which occurrences notify.
//! 3. **Dispatch**: every registered [`Notifier`] is invoked in isolation; one
//!    failing or panicking backend never stops the others.
//!
//! The HTTP middleware lives in the `faultline-tower` crate. This crate can be
//! used on its own for jobs that run outside a request.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use faultline::{
//!     ExceptionNotifier, Failure, LogNotifier, MemoryGroupingCache, NotifierConfig, RequestContext,
//! };
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("nightly export failed")]
//! struct ExportFailed;
//!
//! let config = NotifierConfig::builder()
//!     .ignore_failure("Cancelled")
//!     .error_grouping(Duration::from_secs(300))
//!     .build();
//!
//! let notifier = ExceptionNotifier::builder(config)
//!     .grouping_cache(Arc::new(MemoryGroupingCache::new()))
//!     .notifier("log", Arc::new(LogNotifier::new()))
//!     .build()
//!     .unwrap();
//!
//! let err = ExportFailed;
//! let mut context = RequestContext::background();
//! let outcome = notifier.notify(&Failure::from_error(&err), &mut context);
//!
//! assert!(outcome.delivered());
//! assert!(context.delivered());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod error;
pub mod failure;
pub mod grouping;
pub mod ignore;
pub mod notifier;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod trigger;

pub use config::{NotifierConfig, NotifierConfigBuilder, NotifierSpec};
pub use context::{RequestContext, RequestSnapshot};
pub use error::{FaultlineError, NotifierError, Result};
pub use failure::{CASCADE_PASS_KIND, DynError, Failure, FailureMatcher, FailureSource, PANIC_KIND};
pub use grouping::{GroupingCache, GroupingEntry, GroupingKey, MemoryGroupingCache, Occurrence};
pub use ignore::{CrawlerMatcher, IgnoreChain, IgnorePredicate, IgnoreReason};
pub use notifier::{Delivery, FnNotifier, LogNotifier, LogOptions, Notifier};
pub use pipeline::{ExceptionNotifier, ExceptionNotifierBuilder, NotifyOutcome};
pub use registry::{DeliveryStatus, DispatchSummary, NotifierFactories, NotifierFactory, NotifierRegistry, NotifierResult};
pub use report::FailureReport;
pub use trigger::{NotificationTrigger, TriggerDecision, TriggerMode};
