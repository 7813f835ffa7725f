//! Tower middleware for `faultline`.
//!
//! [`ExceptionNotificationLayer`] wraps any `tower::Service` over
//! `http::Request`/`http::Response`. When the wrapped service returns an
//! error, panics, or (if enabled) answers with `X-Cascade: pass`, the failure
//! is run through a shared [`faultline::ExceptionNotifier`]. The caller
//! always gets back exactly what the wrapped service produced.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use faultline::{ExceptionNotifier, LogNotifier, NotifierConfig};
//! use faultline_tower::ExceptionNotificationLayer;
//! use http::{Request, Response};
//! use tower::{Layer, ServiceExt};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let notifier = ExceptionNotifier::builder(NotifierConfig::default())
//!     .notifier("log", Arc::new(LogNotifier::new()))
//!     .build()
//!     .unwrap();
//!
//! let service = ExceptionNotificationLayer::new(Arc::new(notifier)).layer(tower::service_fn(
//!     |_req: Request<()>| async { Ok::<_, std::io::Error>(Response::new("hello")) },
//! ));
//!
//! let response = service.oneshot(Request::new(())).await.unwrap();
//! assert_eq!(*response.body(), "hello");
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod layer;
pub mod receipt;

pub use layer::{ExceptionNotificationLayer, ExceptionNotificationService, X_CASCADE, is_cascade_pass};
pub use receipt::DeliveryReceipt;
