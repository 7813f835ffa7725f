//! The exception notification layer and service.

use std::any::Any;
use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::task::{Context, Poll};

use faultline::{ExceptionNotifier, Failure, NotifyOutcome, RequestContext};
use futures::FutureExt;
use futures::future::BoxFuture;
use http::header::HeaderName;
use http::{Request, Response};
use tower::{Layer, Service};
use tracing::{debug, error, warn};

use crate::receipt::DeliveryReceipt;

/// Response header a handler sets to hand the request on to the next one.
pub const X_CASCADE: HeaderName = HeaderName::from_static("x-cascade");

/// Returns true if the response carries `X-Cascade: pass`.
#[must_use]
pub fn is_cascade_pass<B>(response: &Response<B>) -> bool {
    response
        .headers()
        .get(&X_CASCADE)
        .is_some_and(|value| value.as_bytes() == b"pass")
}

/// Tower layer that reports failures of the wrapped service.
#[derive(Debug, Clone)]
pub struct ExceptionNotificationLayer {
    notifier: Arc<ExceptionNotifier>,
}

impl ExceptionNotificationLayer {
    /// Creates the layer around a built pipeline.
    #[must_use]
    pub const fn new(notifier: Arc<ExceptionNotifier>) -> Self {
        Self { notifier }
    }

    /// Returns the pipeline.
    #[must_use]
    pub fn notifier(&self) -> &ExceptionNotifier {
        &self.notifier
    }
}

impl<S> Layer<S> for ExceptionNotificationLayer {
    type Service = ExceptionNotificationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ExceptionNotificationService {
            inner,
            notifier: Arc::clone(&self.notifier),
        }
    }
}

/// The service wrapper that reports failures.
///
/// Errors are returned unchanged and panics are resumed after notifying. A
/// cascade-pass response is only treated as a failure when the pipeline was
/// configured with `ignore_cascade_pass = false`; the response is then
/// returned with the [`NotifyOutcome`] in its extensions.
#[derive(Debug, Clone)]
pub struct ExceptionNotificationService<S> {
    inner: S,
    notifier: Arc<ExceptionNotifier>,
}

impl<S> ExceptionNotificationService<S> {
    /// Wraps a service directly.
    #[must_use]
    pub const fn new(inner: S, notifier: Arc<ExceptionNotifier>) -> Self {
        Self { inner, notifier }
    }

    /// Returns a reference to the wrapped service.
    #[must_use]
    pub const fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ExceptionNotificationService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: StdError + Send + Sync + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let receipt = req
            .extensions()
            .get::<DeliveryReceipt>()
            .cloned()
            .unwrap_or_default();
        req.extensions_mut().insert(receipt.clone());

        let mut context = RequestContext::for_request(&req);
        let notifier = Arc::clone(&self.notifier);

        // Use the instance poll_ready was called on and leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let future = if notifier.catch_panics() {
            match panic::catch_unwind(AssertUnwindSafe(|| inner.call(req))) {
                Ok(future) => future,
                Err(payload) => {
                    report_panic(&notifier, payload.as_ref(), &mut context, &receipt);
                    panic::resume_unwind(payload)
                }
            }
        } else {
            inner.call(req)
        };

        Box::pin(async move {
            let result = if notifier.catch_panics() {
                match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => {
                        report_panic(&notifier, payload.as_ref(), &mut context, &receipt);
                        panic::resume_unwind(payload)
                    }
                }
            } else {
                future.await
            };

            match result {
                Ok(mut response) => {
                    if !notifier.ignore_cascade_pass() && is_cascade_pass(&response) {
                        debug!("handler passed the request on, reporting cascade");
                        if let Some(outcome) = notify_guarded(&notifier, &Failure::cascade_pass(), &mut context, &receipt) {
                            response.extensions_mut().insert(outcome);
                        }
                    }
                    Ok(response)
                }
                Err(err) => {
                    notify_guarded(&notifier, &Failure::from_error(&err), &mut context, &receipt);
                    Err(err)
                }
            }
        })
    }
}

fn report_panic(
    notifier: &ExceptionNotifier,
    payload: &(dyn Any + Send),
    context: &mut RequestContext,
    receipt: &DeliveryReceipt,
) {
    let failure = Failure::from_panic(payload);
    error!(panic_message = %failure.message(), "wrapped service panicked");
    notify_guarded(notifier, &failure, context, receipt);
}

/// Runs the pipeline for one failure, containing any panic raised inside it.
///
/// User predicates run here, so a panic must not replace the request's own
/// result.
fn notify_guarded(
    notifier: &ExceptionNotifier,
    failure: &Failure<'_>,
    context: &mut RequestContext,
    receipt: &DeliveryReceipt,
) -> Option<NotifyOutcome> {
    match panic::catch_unwind(AssertUnwindSafe(|| notifier.notify(failure, context))) {
        Ok(outcome) => {
            if outcome.delivered() {
                receipt.mark_delivered();
            }
            Some(outcome)
        }
        Err(payload) => {
            let caught = Failure::from_panic(payload.as_ref());
            warn!(
                kind = %failure.kind(),
                panic_message = %caught.message(),
                "notification pipeline panicked, dropping notification"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use faultline::{Delivery, FnNotifier, NotifierConfig};
    use http::StatusCode;
    use test_case::test_case;
    use tower::ServiceExt;

    #[derive(Debug, thiserror::Error)]
    #[error("handler failed")]
    struct HandlerFailed;

    fn pipeline(config: NotifierConfig, calls: &Arc<AtomicUsize>) -> Arc<ExceptionNotifier> {
        let counter = Arc::clone(calls);
        let notifier = ExceptionNotifier::builder(config)
            .notifier(
                "count",
                Arc::new(FnNotifier::new("count", move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Delivery::confirmed())
                })),
            )
            .build()
            .unwrap();
        Arc::new(notifier)
    }

    async fn ok_handler(_req: Request<()>) -> Result<Response<&'static str>, HandlerFailed> {
        Ok(Response::new("ok"))
    }

    async fn failing_handler(_req: Request<()>) -> Result<Response<&'static str>, HandlerFailed> {
        Err(HandlerFailed)
    }

    async fn cascading_handler(_req: Request<()>) -> Result<Response<&'static str>, Infallible> {
        Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header(X_CASCADE, "pass")
            .body("")
            .unwrap())
    }

    #[test_case(Some("pass"), true ; "pass")]
    #[test_case(Some("PASS"), false ; "case sensitive")]
    #[test_case(Some("stop"), false ; "other value")]
    #[test_case(None, false ; "missing")]
    fn cascade_detection(value: Option<&str>, expected: bool) {
        let mut builder = Response::builder();
        if let Some(value) = value {
            builder = builder.header(X_CASCADE, value);
        }
        assert_eq!(is_cascade_pass(&builder.body(()).unwrap()), expected);
    }

    #[tokio::test]
    async fn success_passes_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let layer = ExceptionNotificationLayer::new(pipeline(NotifierConfig::default(), &calls));
        let service = layer.layer(tower::service_fn(ok_handler));

        let response = service.oneshot(Request::new(())).await.unwrap();

        assert_eq!(*response.body(), "ok");
        assert!(response.extensions().get::<NotifyOutcome>().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn error_is_notified_and_returned() {
        let calls = Arc::new(AtomicUsize::new(0));
        let layer = ExceptionNotificationLayer::new(pipeline(NotifierConfig::default(), &calls));
        let service = layer.layer(tower::service_fn(failing_handler));

        let receipt = DeliveryReceipt::new();
        let mut req = Request::new(());
        req.extensions_mut().insert(receipt.clone());

        let err = service.oneshot(req).await.unwrap_err();

        assert_eq!(err.to_string(), "handler failed");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(receipt.delivered());
    }

    #[tokio::test]
    async fn inner_service_sees_receipt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let layer = ExceptionNotificationLayer::new(pipeline(NotifierConfig::default(), &calls));
        let service = layer.layer(tower::service_fn(|req: Request<()>| async move {
            let present = req.extensions().get::<DeliveryReceipt>().is_some();
            Ok::<_, HandlerFailed>(Response::new(present))
        }));

        let response = service.oneshot(Request::new(())).await.unwrap();
        assert!(*response.body());
    }

    #[tokio::test]
    async fn cascade_ignored_by_default() {
        let calls = Arc::new(AtomicUsize::new(0));
        let layer = ExceptionNotificationLayer::new(pipeline(NotifierConfig::default(), &calls));
        let service = layer.layer(tower::service_fn(cascading_handler));

        let response = service.oneshot(Request::new(())).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.extensions().get::<NotifyOutcome>().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cascade_reported_when_enabled() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = NotifierConfig::builder().ignore_cascade_pass(false).build();
        let layer = ExceptionNotificationLayer::new(pipeline(config, &calls));
        let service = layer.layer(tower::service_fn(cascading_handler));

        let response = service.oneshot(Request::new(())).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let outcome = response.extensions().get::<NotifyOutcome>().unwrap();
        assert!(outcome.delivered());
    }

    #[tokio::test]
    async fn panic_in_future_is_notified_and_resumed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let layer = ExceptionNotificationLayer::new(pipeline(NotifierConfig::default(), &calls));
        let service = layer.layer(tower::service_fn(|_req: Request<()>| async move {
            if true {
                panic!("handler exploded");
            }
            Ok::<_, HandlerFailed>(Response::new(()))
        }));

        let result = AssertUnwindSafe(service.oneshot(Request::new(())))
            .catch_unwind()
            .await;

        let payload = result.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"handler exploded"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panics_pass_untouched_when_capture_disabled() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = NotifierConfig::builder().catch_panics(false).build();
        let layer = ExceptionNotificationLayer::new(pipeline(config, &calls));
        let service = layer.layer(tower::service_fn(|_req: Request<()>| async move {
            if true {
                panic!("handler exploded");
            }
            Ok::<_, HandlerFailed>(Response::new(()))
        }));

        let result = AssertUnwindSafe(service.oneshot(Request::new(())))
            .catch_unwind()
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    fn panicking_predicate(config: NotifierConfig, calls: &Arc<AtomicUsize>) -> Arc<ExceptionNotifier> {
        let counter = Arc::clone(calls);
        let notifier = ExceptionNotifier::builder(config)
            .ignore_if("broken", |_, _| panic!("predicate exploded"))
            .notifier(
                "count",
                Arc::new(FnNotifier::new("count", move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Delivery::confirmed())
                })),
            )
            .build()
            .unwrap();
        Arc::new(notifier)
    }

    #[tokio::test]
    async fn predicate_panic_keeps_original_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let layer = ExceptionNotificationLayer::new(panicking_predicate(NotifierConfig::default(), &calls));
        let service = layer.layer(tower::service_fn(failing_handler));

        let receipt = DeliveryReceipt::new();
        let mut req = Request::new(());
        req.extensions_mut().insert(receipt.clone());

        let err = service.oneshot(req).await.unwrap_err();

        assert_eq!(err.to_string(), "handler failed");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!receipt.delivered());
    }

    #[tokio::test]
    async fn predicate_panic_keeps_cascade_response() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = NotifierConfig::builder().ignore_cascade_pass(false).build();
        let layer = ExceptionNotificationLayer::new(panicking_predicate(config, &calls));
        let service = layer.layer(tower::service_fn(cascading_handler));

        let response = service.oneshot(Request::new(())).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.extensions().get::<NotifyOutcome>().is_none());
    }

    #[tokio::test]
    async fn predicate_panic_keeps_handler_panic() {
        let calls = Arc::new(AtomicUsize::new(0));
        let layer = ExceptionNotificationLayer::new(panicking_predicate(NotifierConfig::default(), &calls));
        let service = layer.layer(tower::service_fn(|_req: Request<()>| async move {
            if true {
                panic!("handler exploded");
            }
            Ok::<_, HandlerFailed>(Response::new(()))
        }));

        let result = AssertUnwindSafe(service.oneshot(Request::new(())))
            .catch_unwind()
            .await;

        let payload = result.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"handler exploded"));
    }

    #[derive(Clone)]
    struct PanicsOnCall;

    impl Service<Request<()>> for PanicsOnCall {
        type Response = Response<()>;
        type Error = HandlerFailed;
        type Future = futures::future::Ready<Result<Response<()>, HandlerFailed>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: Request<()>) -> Self::Future {
            panic!("call exploded")
        }
    }

    #[test]
    fn panic_in_call_is_notified_and_resumed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut service = ExceptionNotificationService::new(PanicsOnCall, pipeline(NotifierConfig::default(), &calls));

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _future = service.call(Request::new(()));
        }));

        let payload = result.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"call exploded"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
