//! Ignore rules evaluated before any grouping or dispatch.
//!
//! The chain is checked in a fixed order: ignored failure kinds first, then
//! custom predicates in registration order, then the crawler predicate.
//! The first rule that matches wins and the remaining rules are not run.

use std::fmt;
use std::sync::Arc;

use regex::RegexSet;

use crate::context::RequestContext;
use crate::error::{FaultlineError, Result};
use crate::failure::{Failure, FailureMatcher};

/// A custom ignore rule.
pub type IgnorePredicate = Arc<dyn Fn(&Failure<'_>, &RequestContext) -> bool + Send + Sync>;

/// Name under which the crawler predicate is registered.
pub const CRAWLER_PREDICATE: &str = "crawler";

/// Why a failure was ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The failure kind is on the ignore list.
    Kind(String),
    /// A named predicate matched.
    Predicate(String),
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kind(kind) => write!(f, "ignored kind {kind}"),
            Self::Predicate(name) => write!(f, "predicate {name}"),
        }
    }
}

#[derive(Clone)]
struct NamedPredicate {
    name: String,
    predicate: IgnorePredicate,
}

/// Matches requests coming from crawlers by user agent.
#[derive(Debug, Clone)]
pub struct CrawlerMatcher {
    patterns: RegexSet,
}

impl CrawlerMatcher {
    /// Compiles the given user-agent patterns.
    ///
    /// # Errors
    ///
    /// Returns `FaultlineError::InvalidCrawlerPattern` naming the first pattern
    /// that does not compile.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(|p| p.as_ref().to_string()).collect();

        // Compile one by one first so the error names the culprit.
        for pattern in &patterns {
            regex::Regex::new(pattern).map_err(|e| FaultlineError::InvalidCrawlerPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
        }

        let patterns = RegexSet::new(&patterns).map_err(|e| FaultlineError::InvalidCrawlerPattern {
            pattern: patterns.join(", "),
            reason: e.to_string(),
        })?;

        Ok(Self { patterns })
    }

    /// Returns the number of patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Returns true if there are no patterns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Returns true if the user agent matches any pattern.
    #[must_use]
    pub fn matches_agent(&self, agent: &str) -> bool {
        self.patterns.is_match(agent)
    }

    /// Returns true if the context's request comes from a crawler.
    ///
    /// A missing request or user agent never matches.
    #[must_use]
    pub fn matches(&self, context: &RequestContext) -> bool {
        context
            .user_agent()
            .is_some_and(|agent| self.matches_agent(agent))
    }
}

/// Ordered ignore rules.
#[derive(Clone, Default)]
pub struct IgnoreChain {
    matchers: Vec<FailureMatcher>,
    predicates: Vec<NamedPredicate>,
}

impl IgnoreChain {
    /// Creates an empty chain that ignores nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a failure kind matcher.
    pub fn push_matcher(&mut self, matcher: FailureMatcher) {
        self.matchers.push(matcher);
    }

    /// Appends a named predicate.
    pub fn push_predicate<F>(&mut self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&Failure<'_>, &RequestContext) -> bool + Send + Sync + 'static,
    {
        self.push_shared_predicate(name, Arc::new(predicate));
    }

    /// Appends an already shared predicate.
    pub fn push_shared_predicate(&mut self, name: impl Into<String>, predicate: IgnorePredicate) {
        self.predicates.push(NamedPredicate {
            name: name.into(),
            predicate,
        });
    }

    /// Appends the crawler predicate.
    pub fn push_crawlers(&mut self, crawlers: CrawlerMatcher) {
        self.push_predicate(CRAWLER_PREDICATE, move |_, context| crawlers.matches(context));
    }

    /// Returns the number of kind matchers.
    #[must_use]
    pub fn matcher_count(&self) -> usize {
        self.matchers.len()
    }

    /// Returns the number of predicates.
    #[must_use]
    pub fn predicate_count(&self) -> usize {
        self.predicates.len()
    }

    /// Returns the reason the failure is ignored, if it is.
    #[must_use]
    pub fn check(&self, failure: &Failure<'_>, context: &RequestContext) -> Option<IgnoreReason> {
        if let Some(matcher) = self.matchers.iter().find(|m| m.matches(failure)) {
            return Some(IgnoreReason::Kind(matcher.name().to_string()));
        }

        self.predicates
            .iter()
            .find(|p| (p.predicate)(failure, context))
            .map(|p| IgnoreReason::Predicate(p.name.clone()))
    }

    /// Returns true if the failure must not be notified.
    #[must_use]
    pub fn should_ignore(&self, failure: &Failure<'_>, context: &RequestContext) -> bool {
        self.check(failure, context).is_some()
    }
}

impl fmt::Debug for IgnoreChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IgnoreChain")
            .field("matchers", &self.matchers)
            .field(
                "predicates",
                &self.predicates.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
