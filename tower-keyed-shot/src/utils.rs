use std::sync::Arc;

use keyed_shot::Strategy;
use tower::ServiceBuilder;
use tower::layer::util::Stack;

use crate::KeyedRateLimitLayer;

/// Service Builder Extension with additional useful functions for tower::ServiceBuilder.
pub trait ServiceBuilderExt<L> {
    /// Add a fail-closed per-key rate limit
    fn keyed_rate_limit<St, K>(
        self,
        limiter: Arc<St>,
        key_fn: K,
    ) -> ServiceBuilder<Stack<KeyedRateLimitLayer<St, K>, L>>
    where
        St: Strategy + ?Sized;

    /// Add a per-key rate limit that lets requests through when the store is down
    fn keyed_rate_limit_fail_open<St, K>(
        self,
        limiter: Arc<St>,
        key_fn: K,
    ) -> ServiceBuilder<Stack<KeyedRateLimitLayer<St, K>, L>>
    where
        St: Strategy + ?Sized;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn keyed_rate_limit<St, K>(
        self,
        limiter: Arc<St>,
        key_fn: K,
    ) -> ServiceBuilder<Stack<KeyedRateLimitLayer<St, K>, L>>
    where
        St: Strategy + ?Sized,
    {
        self.layer(KeyedRateLimitLayer::new(limiter, key_fn))
    }

    fn keyed_rate_limit_fail_open<St, K>(
        self,
        limiter: Arc<St>,
        key_fn: K,
    ) -> ServiceBuilder<Stack<KeyedRateLimitLayer<St, K>, L>>
    where
        St: Strategy + ?Sized,
    {
        self.layer(KeyedRateLimitLayer::new(limiter, key_fn).with_fail_open(true))
    }
}
