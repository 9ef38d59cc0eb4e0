use std::num::NonZeroU64;
use std::ops::ControlFlow;
use std::time::Duration;

use tracing::debug;
use tracing::warn;

use super::Decision;
use super::Reason;
use super::Strategy;
use crate::error::LimitError;
use crate::store::AtomicStore;
use crate::types::CounterEntry;
use crate::types::Current;
use crate::types::Expiry;
use crate::types::Mutation;
use crate::types::StoredValue;

/// A per-key window-based limiter.
///
/// Each key gets a counter whose expiry is set by the first admitted request
/// of its window. Windows are not aligned to the wall clock: a new one starts
/// with the first request after the previous one expired. Like any fixed
/// window it can admit up to twice the limit across a window boundary.
///
/// The limiter holds no state of its own. Counting and expiry both live in
/// the store.
#[derive(Debug, Clone)]
pub struct FixedWindowLimiter<S> {
    store: S,
}

impl<S: AtomicStore> FixedWindowLimiter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Admits at most `limit` requests per `window` for `key`.
    ///
    /// # Errors
    ///
    /// * [`LimitError::InvalidParameters`] if `limit` or `window` is zero. The
    ///   store is not touched.
    /// * Any store failure, including [`LimitError::EntryCorrupt`] when `key`
    ///   holds something other than a counter.
    pub fn try_acquire(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<Decision, LimitError> {
        let limit = validate(limit, window)?;
        self.acquire(key, limit, window)
    }

    /// Binds the limiter to a validated quota.
    pub fn quota(self, limit: u64, window: Duration) -> Result<FixedWindow<S>, LimitError> {
        let limit = validate(limit, window)?;
        Ok(FixedWindow {
            limiter: self,
            limit,
            window,
        })
    }

    fn acquire(
        &self,
        key: &str,
        limit: NonZeroU64,
        window: Duration,
    ) -> Result<Decision, LimitError> {
        let decision = self
            .store
            .atomic_execute(key, |current| step(key, current, limit.get(), window))
            .inspect_err(|e| warn!(key, error = %e, "fixed window store failure"))?;
        debug!(key, allowed = decision.is_continue(), "fixed window decision");
        Ok(decision)
    }
}

fn validate(limit: u64, window: Duration) -> Result<NonZeroU64, LimitError> {
    let limit = NonZeroU64::new(limit)
        .ok_or(LimitError::InvalidParameters("limit must be non-zero"))?;
    if window.is_zero() {
        return Err(LimitError::InvalidParameters("window must be non-zero"));
    }
    Ok(limit)
}

fn read_counter(key: &str, current: &Current) -> Result<CounterEntry, LimitError> {
    match current.value {
        None => Ok(CounterEntry {
            count: 0,
            expires_at: None,
        }),
        Some(StoredValue::Counter(count)) => Ok(CounterEntry {
            count,
            expires_at: current.expires_at,
        }),
        Some(other) => Err(LimitError::corrupt(
            key,
            format!("expected a counter, found a {}", other.kind()),
        )),
    }
}

/// One read-check-update of a counter, run inside the store.
fn step(
    key: &str,
    current: Current,
    limit: u64,
    window: Duration,
) -> Result<(Mutation, Decision), LimitError> {
    let CounterEntry { count, expires_at } = read_counter(key, &current)?;

    if count >= limit {
        let retry_after = expires_at.map_or(window, |at| at.saturating_sub(current.now));
        return Ok((
            Mutation::Keep,
            ControlFlow::Break(Reason::Rejected { retry_after }),
        ));
    }

    // A zero count is a fresh window and is the only place expiry is set.
    let expiry = if count == 0 {
        Expiry::After(window)
    } else {
        Expiry::Keep
    };
    let mutation = Mutation::Set {
        value: StoredValue::Counter(count + 1),
        expiry,
    };
    Ok((mutation, ControlFlow::Continue(())))
}

/// A [`FixedWindowLimiter`] bound to a quota.
#[derive(Debug, Clone)]
pub struct FixedWindow<S> {
    limiter: FixedWindowLimiter<S>,
    limit: NonZeroU64,
    window: Duration,
}

impl<S> FixedWindow<S> {
    pub fn limit(&self) -> u64 {
        self.limit.get()
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl<S> Strategy for FixedWindow<S>
where
    S: AtomicStore + std::fmt::Debug,
{
    fn process(&self, key: &str) -> Result<Decision, LimitError> {
        self.limiter.acquire(key, self.limit, self.window)
    }
}
