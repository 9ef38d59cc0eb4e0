use std::ops::ControlFlow;
use std::time::Duration;

use tracing::debug;
use tracing::warn;

use super::Decision;
use super::Reason;
use super::Strategy;
use crate::error::LimitError;
use crate::store::AtomicStore;
use crate::types::BucketEntry;
use crate::types::Current;
use crate::types::Expiry;
use crate::types::Mutation;
use crate::types::StoredValue;

/// A per-key continuous token bucket.
///
/// Permits accrue in proportion to the time elapsed since a key was last
/// touched, capped at `max_permits`. The refill is computed at access time, so
/// there is no background ticker and idle keys simply see a larger gap.
///
/// A key seen for the first time starts full: its bucket is created with
/// `max_permits` stored and the store's current time as the last refill.
#[derive(Debug, Clone)]
pub struct TokenBucketLimiter<S> {
    store: S,
}

impl<S: AtomicStore> TokenBucketLimiter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Spends one permit from `key`'s bucket if at least one is available.
    ///
    /// # Errors
    ///
    /// * [`LimitError::InvalidParameters`] if either rate parameter is not a
    ///   positive, finite number. The store is not touched.
    /// * Any store failure, including [`LimitError::EntryCorrupt`] when `key`
    ///   holds something other than a valid bucket.
    pub fn try_acquire(
        &self,
        key: &str,
        max_permits: f64,
        permits_per_second: f64,
    ) -> Result<Decision, LimitError> {
        validate(max_permits, permits_per_second)?;
        self.acquire(key, max_permits, permits_per_second)
    }

    /// Binds the limiter to a validated quota.
    pub fn quota(
        self,
        max_permits: f64,
        permits_per_second: f64,
    ) -> Result<TokenBucket<S>, LimitError> {
        validate(max_permits, permits_per_second)?;
        Ok(TokenBucket {
            limiter: self,
            max_permits,
            permits_per_second,
        })
    }

    fn acquire(
        &self,
        key: &str,
        max_permits: f64,
        permits_per_second: f64,
    ) -> Result<Decision, LimitError> {
        let decision = self
            .store
            .atomic_execute(key, |current| step(key, current, max_permits, permits_per_second))
            .inspect_err(|e| warn!(key, error = %e, "token bucket store failure"))?;
        debug!(key, allowed = decision.is_continue(), "token bucket decision");
        Ok(decision)
    }
}

fn validate(max_permits: f64, permits_per_second: f64) -> Result<(), LimitError> {
    if !(max_permits > 0.0 && max_permits.is_finite()) {
        return Err(LimitError::InvalidParameters(
            "max_permits must be positive and finite",
        ));
    }
    if !(permits_per_second > 0.0 && permits_per_second.is_finite()) {
        return Err(LimitError::InvalidParameters(
            "permits_per_second must be positive and finite",
        ));
    }
    Ok(())
}

/// One refill-then-spend of a bucket, run inside the store.
fn step(
    key: &str,
    current: Current,
    max_permits: f64,
    permits_per_second: f64,
) -> Result<(Mutation, Decision), LimitError> {
    let bucket = match current.value {
        None => BucketEntry {
            stored_permits: max_permits,
            last_refill: current.now,
        },
        Some(StoredValue::Bucket(bucket)) if bucket.stored_permits >= 0.0 => bucket,
        Some(StoredValue::Bucket(bucket)) => {
            return Err(LimitError::corrupt(
                key,
                format!("stored permits of {}", bucket.stored_permits),
            ));
        }
        Some(other) => {
            return Err(LimitError::corrupt(
                key,
                format!("expected a token bucket, found a {}", other.kind()),
            ));
        }
    };

    // A clock behind the last refill counts as no time passing.
    let elapsed = current.now.saturating_sub(bucket.last_refill);
    let refill = elapsed.as_secs_f64() * permits_per_second;
    let available = (bucket.stored_permits + refill).min(max_permits);
    let last_refill = bucket.last_refill.max(current.now);

    if available < 1.0 {
        let retry_after = Duration::try_from_secs_f64((1.0 - available) / permits_per_second)
            .unwrap_or(Duration::MAX);
        let mutation = if refill > 0.0 {
            set(available, last_refill)
        } else {
            Mutation::Keep
        };
        return Ok((
            mutation,
            ControlFlow::Break(Reason::Rejected { retry_after }),
        ));
    }

    Ok((set(available - 1.0, last_refill), ControlFlow::Continue(())))
}

fn set(stored_permits: f64, last_refill: Duration) -> Mutation {
    Mutation::Set {
        value: StoredValue::Bucket(BucketEntry {
            stored_permits,
            last_refill,
        }),
        expiry: Expiry::Keep,
    }
}

/// A [`TokenBucketLimiter`] bound to a quota.
#[derive(Debug, Clone)]
pub struct TokenBucket<S> {
    limiter: TokenBucketLimiter<S>,
    max_permits: f64,
    permits_per_second: f64,
}

impl<S> TokenBucket<S> {
    pub fn max_permits(&self) -> f64 {
        self.max_permits
    }

    pub fn permits_per_second(&self) -> f64 {
        self.permits_per_second
    }
}

impl<S> Strategy for TokenBucket<S>
where
    S: AtomicStore + std::fmt::Debug,
{
    fn process(&self, key: &str) -> Result<Decision, LimitError> {
        self.limiter
            .acquire(key, self.max_permits, self.permits_per_second)
    }
}
