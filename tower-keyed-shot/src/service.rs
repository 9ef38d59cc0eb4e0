use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use pin_project_lite::pin_project;
use tower::BoxError;
use tower::Service;
use tracing::debug;
use tracing::warn;

use keyed_shot::Reason;
use keyed_shot::Strategy;

use crate::error::ShotError;

#[derive(Clone, Debug)]
struct KeyedRateLimitMetrics {
    decisions: Counter<u64>,
}

impl KeyedRateLimitMetrics {
    fn new() -> Self {
        let meter = global::meter("keyed_rate_limit_service");
        Self {
            decisions: meter.u64_counter("keyed_shot.decisions").build(),
        }
    }

    fn record(&self, outcome: &'static str) {
        self.decisions.add(1, &[KeyValue::new("outcome", outcome)]);
    }
}

/// Admits or rejects each request according to the quota of its key.
///
/// The key is only known once a request arrives, so the limiter is consulted
/// in `call`. `poll_ready` reflects the inner service alone.
pub struct KeyedRateLimitService<L, K, S>
where
    L: ?Sized,
{
    inner: S,
    limiter: Arc<L>,
    key_fn: K,
    fail_open: bool,
    instruments: KeyedRateLimitMetrics,
}

pin_project! {
    /// Either the inner service's future or an immediate rejection.
    pub struct ResponseFuture<F> {
        #[pin]
        inner: Option<F>,
        rejection: Option<ShotError>,
    }
}

impl<F> ResponseFuture<F> {
    fn forward(inner: F) -> Self {
        Self {
            inner: Some(inner),
            rejection: None,
        }
    }

    fn reject(error: ShotError) -> Self {
        Self {
            inner: None,
            rejection: Some(error),
        }
    }
}

impl<F, T, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<T, E>>,
    E: From<BoxError>,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.inner.as_pin_mut() {
            Some(inner) => inner.poll(cx),
            None => {
                let error = this
                    .rejection
                    .take()
                    .expect("ResponseFuture polled after completion");
                Poll::Ready(Err(E::from(BoxError::from(error))))
            }
        }
    }
}

impl<L, K, S> Clone for KeyedRateLimitService<L, K, S>
where
    L: ?Sized,
    K: Clone,
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: Arc::clone(&self.limiter),
            key_fn: self.key_fn.clone(),
            fail_open: self.fail_open,
            instruments: self.instruments.clone(),
        }
    }
}

impl<L, K, S> std::fmt::Debug for KeyedRateLimitService<L, K, S>
where
    L: std::fmt::Debug + ?Sized,
    S: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedRateLimitService")
            .field("inner", &self.inner)
            .field("limiter", &self.limiter)
            .field("fail_open", &self.fail_open)
            .finish_non_exhaustive()
    }
}

impl<L, K, S, Req> Service<Req> for KeyedRateLimitService<L, K, S>
where
    L: Strategy + ?Sized,
    K: Fn(&Req) -> String,
    S: Service<Req, Error = BoxError>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let key = (self.key_fn)(&req);

        match self.limiter.process(&key) {
            Ok(ControlFlow::Continue(())) => {
                self.instruments.record("admitted");
                ResponseFuture::forward(self.inner.call(req))
            }
            Ok(ControlFlow::Break(Reason::Rejected { retry_after })) => {
                self.instruments.record("rejected");
                debug!(key = %key, ?retry_after, "request rate limited");
                ResponseFuture::reject(ShotError::RateLimited { retry_after })
            }
            Err(error) => {
                self.instruments.record("store_error");
                if self.fail_open {
                    warn!(key = %key, %error, "rate limit unavailable, failing open");
                    ResponseFuture::forward(self.inner.call(req))
                } else {
                    warn!(key = %key, %error, "rate limit unavailable, failing closed");
                    ResponseFuture::reject(ShotError::Store(error))
                }
            }
        }
    }
}

impl<L, K, S> KeyedRateLimitService<L, K, S>
where
    L: ?Sized,
{
    pub fn new(inner: S, limiter: Arc<L>, key_fn: K) -> Self {
        Self {
            inner,
            limiter,
            key_fn,
            fail_open: false,
            instruments: KeyedRateLimitMetrics::new(),
        }
    }

    /// Set whether requests pass through when the limiter cannot decide.
    ///
    /// Defaults to `false`: a store failure rejects the request with
    /// `ShotError::Store`.
    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }
}
