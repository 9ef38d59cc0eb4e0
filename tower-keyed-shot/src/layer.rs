use std::sync::Arc;

use keyed_shot::Strategy;
use tower::Layer;

use crate::service::KeyedRateLimitService;

/// Applies a per-key rate limit to requests.
///
/// `key_fn` maps each request to the key its quota is counted against, e.g.
/// a client address or an API token.
#[derive(Debug)]
pub struct KeyedRateLimitLayer<L, K>
where
    L: ?Sized,
{
    limiter: Arc<L>,
    key_fn: K,
    fail_open: bool,
}

impl<L, K> Clone for KeyedRateLimitLayer<L, K>
where
    L: ?Sized,
    K: Clone,
{
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            key_fn: self.key_fn.clone(),
            fail_open: self.fail_open,
        }
    }
}

impl<L, K> KeyedRateLimitLayer<L, K>
where
    L: Strategy + ?Sized,
{
    /// Create a KeyedRateLimitLayer
    pub fn new(limiter: Arc<L>, key_fn: K) -> Self {
        KeyedRateLimitLayer {
            limiter,
            key_fn,
            fail_open: false,
        }
    }

    /// Set whether requests pass through when the limiter cannot decide.
    ///
    /// If `false` (the default), a store failure is returned as
    /// `ShotError::Store` and the inner service is never called.
    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }
}

impl<L, K, S> Layer<S> for KeyedRateLimitLayer<L, K>
where
    L: ?Sized,
    K: Clone,
{
    type Service = KeyedRateLimitService<L, K, S>;

    fn layer(&self, service: S) -> Self::Service {
        KeyedRateLimitService::new(service, Arc::clone(&self.limiter), self.key_fn.clone())
            .with_fail_open(self.fail_open)
    }
}
