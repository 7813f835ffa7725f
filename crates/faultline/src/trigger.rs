//! Deciding whether an occurrence fires notifiers.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FaultlineError;
use crate::failure::Failure;
use crate::grouping::{GroupingCache, GroupingKey};

/// How grouped failures are turned into notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TriggerMode {
    /// Notify only on the first occurrence within a window.
    #[default]
    FirstOnly,
    /// Notify on every occurrence; the cache only keeps counts.
    Every,
    /// Notify when the occurrence count reaches a power of two.
    Exponential,
}

impl TriggerMode {
    /// Returns the mode as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FirstOnly => "first_only",
            Self::Every => "every",
            Self::Exponential => "exponential",
        }
    }

    /// Returns true if occurrence number `count` should notify.
    #[must_use]
    pub const fn fires_on(&self, count: u64) -> bool {
        match self {
            Self::FirstOnly => count == 1,
            Self::Every => true,
            Self::Exponential => count.is_power_of_two(),
        }
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TriggerMode {
    type Err = FaultlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first_only" | "first-only" | "first" => Ok(Self::FirstOnly),
            "every" | "always" => Ok(Self::Every),
            "exponential" => Ok(Self::Exponential),
            _ => Err(FaultlineError::UnsupportedTrigger {
                mode: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for TriggerMode {
    type Error = FaultlineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TriggerMode> for String {
    fn from(mode: TriggerMode) -> Self {
        mode.as_str().to_string()
    }
}

/// The outcome of a trigger evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerDecision {
    /// Whether notifiers should run.
    pub notify: bool,
    /// The grouping key, when grouping is enabled.
    pub key: Option<GroupingKey>,
    /// Occurrences in the current window (1 when grouping is off).
    pub occurrences: u64,
}

/// Fire-or-suppress policy.
#[derive(Debug, Clone)]
pub enum NotificationTrigger {
    /// Grouping disabled: every failure notifies.
    Always,
    /// Grouping enabled.
    Grouped {
        /// Where occurrences are recorded.
        cache: Arc<dyn GroupingCache>,
        /// Length of the dedup window.
        window: TimeDelta,
        /// Which occurrences notify.
        mode: TriggerMode,
    },
}

impl NotificationTrigger {
    /// Creates a grouped trigger.
    #[must_use]
    pub fn grouped(cache: Arc<dyn GroupingCache>, window: TimeDelta, mode: TriggerMode) -> Self {
        Self::Grouped {
            cache,
            window,
            mode,
        }
    }

    /// Returns true if grouping is enabled.
    #[must_use]
    pub const fn is_grouped(&self) -> bool {
        matches!(self, Self::Grouped { .. })
    }

    /// Records the failure and decides whether it notifies.
    ///
    /// The cache is refreshed whether or not the decision is to notify.
    #[must_use]
    pub fn evaluate(&self, failure: &Failure<'_>, now: DateTime<Utc>) -> TriggerDecision {
        match self {
            Self::Always => TriggerDecision {
                notify: true,
                key: None,
                occurrences: 1,
            },
            Self::Grouped {
                cache,
                window,
                mode,
            } => {
                let key = GroupingKey::for_failure(failure);
                let occurrence = cache.record(&key, now, *window);
                let count = occurrence.count();

                // FirstOnly goes by the live entry rather than the count, so a
                // store that lost its count still notifies exactly once.
                let notify = match mode {
                    TriggerMode::FirstOnly => occurrence.is_first(),
                    TriggerMode::Every | TriggerMode::Exponential => mode.fires_on(count),
                };

                TriggerDecision {
                    notify,
                    key: Some(key),
                    occurrences: count,
                }
            }
        }
    }
}
