//! The failure model.
//!
//! A [`Failure`] is the unit of notification decision-making: it borrows the
//! error that escaped a handler (or records a caught panic, or the synthesized
//! cascade-pass signal) together with the identity fields grouping relies on.

use std::any::{Any, type_name};
use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;

use chrono::{DateTime, Utc};

/// A thread-safe error trait object.
pub type DynError = dyn StdError + Send + Sync + 'static;

/// Kind reported for the synthesized cascade-pass failure.
pub const CASCADE_PASS_KIND: &str = "faultline::CascadePass";

/// Kind reported for caught panics.
pub const PANIC_KIND: &str = "panic";

const CASCADE_PASS_MESSAGE: &str = "an inner handler answered with 'X-Cascade: pass', \
     meaning no route matched the request (usually a 404)";

/// Where a failure came from.
#[derive(Debug, Clone, Copy)]
pub enum FailureSource<'a> {
    /// An error returned by the inner handler.
    Error(&'a DynError),
    /// A panic caught while the inner handler ran.
    Panic,
    /// The inner handler signalled that nothing matched the request.
    CascadePass,
}

impl FailureSource<'_> {
    /// Returns the source as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Error(_) => "error",
            Self::Panic => "panic",
            Self::CascadePass => "cascade_pass",
        }
    }
}

impl fmt::Display for FailureSource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An observed failure.
#[derive(Debug, Clone)]
pub struct Failure<'a> {
    source: FailureSource<'a>,
    kind: Cow<'static, str>,
    message: String,
    location: Option<String>,
    occurred_at: DateTime<Utc>,
}

impl<'a> Failure<'a> {
    /// Observes an error. Its kind is the error's type name.
    #[must_use]
    pub fn from_error<E>(error: &'a E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            source: FailureSource::Error(error),
            kind: Cow::Borrowed(type_name::<E>()),
            message: error.to_string(),
            location: None,
            occurred_at: Utc::now(),
        }
    }

    /// Observes a type-erased error under an explicit kind.
    #[must_use]
    pub fn from_dyn(error: &'a DynError, kind: impl Into<Cow<'static, str>>) -> Self {
        Self {
            source: FailureSource::Error(error),
            kind: kind.into(),
            message: error.to_string(),
            location: None,
            occurred_at: Utc::now(),
        }
    }

    /// Observes a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic with a non-string payload".to_string());

        Self {
            source: FailureSource::Panic,
            kind: Cow::Borrowed(PANIC_KIND),
            message,
            location: None,
            occurred_at: Utc::now(),
        }
    }

    /// The synthesized failure for an `X-Cascade: pass` response.
    #[must_use]
    pub fn cascade_pass() -> Self {
        Self {
            source: FailureSource::CascadePass,
            kind: Cow::Borrowed(CASCADE_PASS_KIND),
            message: CASCADE_PASS_MESSAGE.to_string(),
            location: None,
            occurred_at: Utc::now(),
        }
    }

    /// Attaches the code location the failure originated from.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Attaches the caller's source location.
    #[must_use]
    #[track_caller]
    pub fn at_caller(self) -> Self {
        let caller = std::panic::Location::caller();
        self.with_location(caller.to_string())
    }

    /// Overrides the failure kind.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<Cow<'static, str>>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Overrides when the failure occurred.
    #[must_use]
    pub const fn with_occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = at;
        self
    }

    /// Returns where the failure came from.
    #[must_use]
    pub const fn source(&self) -> FailureSource<'a> {
        self.source
    }

    /// Returns the failure kind (an error type name, [`PANIC_KIND`] or [`CASCADE_PASS_KIND`]).
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the originating location, if known.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Returns when the failure was observed.
    #[must_use]
    pub const fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Returns the underlying error, if this failure wraps one.
    #[must_use]
    pub fn error(&self) -> Option<&'a DynError> {
        match self.source {
            FailureSource::Error(err) => Some(err),
            FailureSource::Panic | FailureSource::CascadePass => None,
        }
    }

    /// Returns true for the synthesized cascade-pass failure.
    #[must_use]
    pub const fn is_cascade_pass(&self) -> bool {
        matches!(self.source, FailureSource::CascadePass)
    }

    /// Returns true for a caught panic.
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        matches!(self.source, FailureSource::Panic)
    }

    /// Iterates over the wrapped error and its `source()` chain.
    pub fn chain(&self) -> impl Iterator<Item = &'a (dyn StdError + 'static)> + use<'a> {
        let mut next: Option<&'a (dyn StdError + 'static)> = match self.source {
            FailureSource::Error(err) => Some(err as &(dyn StdError + 'static)),
            FailureSource::Panic | FailureSource::CascadePass => None,
        };
        std::iter::from_fn(move || {
            let current = next?;
            next = current.source();
            Some(current)
        })
    }

    /// Finds the first error of type `T` in the chain.
    #[must_use]
    pub fn find_cause<T: StdError + 'static>(&self) -> Option<&'a T> {
        self.chain().find_map(|err| err.downcast_ref::<T>())
    }

    /// Messages of the errors beneath the top-level one.
    #[must_use]
    pub fn causes(&self) -> Vec<String> {
        self.chain().skip(1).map(ToString::to_string).collect()
    }
}

impl fmt::Display for Failure<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Matches failures that must never be notified.
#[derive(Debug, Clone)]
pub enum FailureMatcher {
    /// Matches a kind name, either in full or by its trailing path segments.
    Kind(String),
    /// Matches when any error in the chain has a given concrete type.
    Typed {
        /// The matched type's name.
        name: &'static str,
        /// Type check applied to each error in the chain.
        check: fn(&(dyn StdError + 'static)) -> bool,
    },
}

fn is_type<E: StdError + 'static>(err: &(dyn StdError + 'static)) -> bool {
    err.is::<E>()
}

impl FailureMatcher {
    /// Matches failures by kind name.
    #[must_use]
    pub fn kind(name: impl Into<String>) -> Self {
        Self::Kind(name.into())
    }

    /// Matches failures whose error chain contains an `E`.
    #[must_use]
    pub fn of<E: StdError + 'static>() -> Self {
        Self::Typed {
            name: type_name::<E>(),
            check: is_type::<E>,
        }
    }

    /// Returns a human-readable name for logs.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Kind(name) => name,
            Self::Typed { name, .. } => name,
        }
    }

    /// Returns true if the failure matches.
    #[must_use]
    pub fn matches(&self, failure: &Failure<'_>) -> bool {
        match self {
            Self::Kind(name) => kind_matches(failure.kind(), name),
            Self::Typed { check, .. } => failure.chain().any(|err| check(err)),
        }
    }
}

fn kind_matches(kind: &str, name: &str) -> bool {
    kind == name
        || kind
            .strip_suffix(name)
            .is_some_and(|prefix| prefix.ends_with("::"))
}
