//! Per-request context handed to ignore predicates and notifiers.

use chrono::{DateTime, Utc};
use http::header::USER_AGENT;
use http::{HeaderMap, Method, Request, Uri, Version};

/// An immutable copy of the request head.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
}

impl RequestSnapshot {
    /// Captures the head of a request.
    #[must_use]
    pub fn from_request<B>(request: &Request<B>) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            version: request.version(),
            headers: request.headers().clone(),
        }
    }

    /// Builds a snapshot from its parts.
    #[must_use]
    pub const fn new(method: Method, uri: Uri, version: Version, headers: HeaderMap) -> Self {
        Self {
            method,
            uri,
            version,
            headers,
        }
    }

    /// Returns the request method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request URI.
    #[must_use]
    pub const fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Returns the HTTP version.
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Returns the request headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the `User-Agent` header, if present and valid UTF-8.
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.headers.get(USER_AGENT).and_then(|v| v.to_str().ok())
    }
}

/// Context for one failure observation.
///
/// Failures raised outside a request (background jobs) use
/// [`RequestContext::background`], which carries no request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request: Option<RequestSnapshot>,
    received_at: DateTime<Utc>,
    delivered: bool,
}

impl RequestContext {
    /// Creates a context for a request.
    #[must_use]
    pub fn new(request: RequestSnapshot) -> Self {
        Self {
            request: Some(request),
            received_at: Utc::now(),
            delivered: false,
        }
    }

    /// Creates a context for a request, capturing its head.
    #[must_use]
    pub fn for_request<B>(request: &Request<B>) -> Self {
        Self::new(RequestSnapshot::from_request(request))
    }

    /// Creates a context with no request attached.
    #[must_use]
    pub fn background() -> Self {
        Self {
            request: None,
            received_at: Utc::now(),
            delivered: false,
        }
    }

    /// Returns the request snapshot, if any.
    #[must_use]
    pub const fn request(&self) -> Option<&RequestSnapshot> {
        self.request.as_ref()
    }

    /// Returns the request's user agent, if any.
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.request.as_ref().and_then(RequestSnapshot::user_agent)
    }

    /// Returns when the context was created.
    #[must_use]
    pub const fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Returns true once at least one notifier confirmed delivery.
    #[must_use]
    pub const fn delivered(&self) -> bool {
        self.delivered
    }

    pub(crate) fn mark_delivered(&mut self) {
        self.delivered = true;
    }
}
